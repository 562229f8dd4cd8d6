//! Creates the address tables in the configured database.

use anyhow::Context;

use address_infra::{PostgresSession, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    address_observability::init();

    let config = StoreConfig::from_env().context("invalid store configuration")?;

    let session = PostgresSession::connect(&config)
        .await
        .context("failed to connect to the address store")?;

    let result = session.ensure_schema().await;
    session.close().await;
    result.context("failed to create address tables")?;

    tracing::info!("address tables are in place");
    Ok(())
}
