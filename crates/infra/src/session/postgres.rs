//! Postgres-backed column-family session.
//!
//! Both address tables are plain Postgres tables whose composite primary keys
//! follow the column-family key order, so every statement the accessors build
//! maps onto one parameterised SQL statement.
//!
//! ## Error Mapping
//!
//! | SQLx Error | SessionError |
//! |------------|--------------|
//! | PoolTimedOut | `Timeout` |
//! | PoolClosed / Io / Tls / Configuration | `Connection` |
//! | ColumnNotFound / ColumnDecode / Decode | `Decode` |
//! | Database / other | `Statement` |
//!
//! ## Thread Safety
//!
//! `PostgresSession` is `Send + Sync`; concurrent statements each borrow their
//! own pooled connection.

use std::sync::Arc;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use address_core::{AddressId, ApplicationId, TenantId};

use super::{AttributeRow, KeyPredicate, RowFilter, Session, SessionError, Statement, TableName};
use crate::config::StoreConfig;

const COLUMNS: &str = "tenant_id, application_id, address_id, address_key, address_value";

/// Postgres column-family session.
#[derive(Debug, Clone)]
pub struct PostgresSession {
    pool: Arc<PgPool>,
}

impl PostgresSession {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool sized by `config`.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &StoreConfig) -> Result<Self, SessionError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Close the pool. Owned by whoever opened the session.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create both address tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), SessionError> {
        for table in [TableName::Address, TableName::AddressIndex] {
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    tenant_id UUID NOT NULL,
                    application_id UUID NOT NULL,
                    address_id UUID NOT NULL,
                    address_key TEXT NOT NULL,
                    address_value TEXT NOT NULL,
                    PRIMARY KEY ({key})
                )
                "#,
                key = primary_key_columns(table)
            );
            sqlx::query(&ddl)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
            debug!(table = table.as_str(), "ensured table");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Session for PostgresSession {
    #[instrument(skip(self, statement), fields(table = %statement.table(), kind = statement.kind()), err)]
    async fn execute(&self, statement: Statement) -> Result<(), SessionError> {
        if matches!(statement, Statement::Select { .. }) {
            return Err(SessionError::Statement(
                "select statements must be issued through query".to_string(),
            ));
        }

        let rendered = render(&statement);
        bind_all(sqlx::query(&rendered.sql), rendered.params)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(statement.kind(), e))?;
        Ok(())
    }

    #[instrument(skip(self, statement), fields(table = %statement.table(), kind = statement.kind()), err)]
    async fn query(&self, statement: Statement) -> Result<Vec<AttributeRow>, SessionError> {
        if !matches!(statement, Statement::Select { .. }) {
            return Err(SessionError::Statement(format!(
                "{} statements must be issued through execute",
                statement.kind()
            )));
        }

        let rendered = render(&statement);
        let rows = bind_all(sqlx::query(&rendered.sql), rendered.params)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select", e))?;

        rows.iter().map(decode_row).collect()
    }
}

/// A bind parameter for a rendered statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SqlParam {
    Uuid(Uuid),
    Text(String),
    TextArray(Vec<String>),
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RenderedSql {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

fn primary_key_columns(table: TableName) -> &'static str {
    match table {
        TableName::Address => "tenant_id, application_id, address_id, address_key",
        TableName::AddressIndex => "tenant_id, application_id, address_key, address_id",
    }
}

pub(crate) fn render(statement: &Statement) -> RenderedSql {
    match statement {
        Statement::Insert { table, row } => RenderedSql {
            sql: format!(
                "INSERT INTO {table} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT ({key}) DO UPDATE SET address_value = EXCLUDED.address_value",
                key = primary_key_columns(*table)
            ),
            params: vec![
                SqlParam::Uuid(*row.tenant_id.as_uuid()),
                SqlParam::Uuid(*row.application_id.as_uuid()),
                SqlParam::Uuid(*row.address_id.as_uuid()),
                SqlParam::Text(row.address_key.clone()),
                SqlParam::Text(row.address_value.clone()),
            ],
        },
        Statement::Delete { table, filter } => {
            let (predicate, params) = render_filter(filter);
            RenderedSql {
                sql: format!("DELETE FROM {table} WHERE {predicate}"),
                params,
            }
        }
        Statement::Select { table, filter, limit } => {
            let (predicate, params) = render_filter(filter);
            let mut sql = format!(
                "SELECT {COLUMNS} FROM {table} WHERE {predicate} ORDER BY {key}",
                key = primary_key_columns(*table)
            );
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            RenderedSql { sql, params }
        }
    }
}

fn render_filter(filter: &RowFilter) -> (String, Vec<SqlParam>) {
    let mut params = vec![
        SqlParam::Uuid(*filter.tenant_id.as_uuid()),
        SqlParam::Uuid(*filter.application_id.as_uuid()),
    ];
    let mut predicate = String::from("tenant_id = $1 AND application_id = $2");

    if let Some(address_id) = filter.address_id {
        params.push(SqlParam::Uuid(*address_id.as_uuid()));
        predicate.push_str(&format!(" AND address_id = ${}", params.len()));
    }

    match &filter.address_key {
        KeyPredicate::Any => {}
        KeyPredicate::Eq(key) => {
            params.push(SqlParam::Text(key.clone()));
            predicate.push_str(&format!(" AND address_key = ${}", params.len()));
        }
        KeyPredicate::In(keys) => {
            params.push(SqlParam::TextArray(keys.clone()));
            predicate.push_str(&format!(" AND address_key = ANY(${})", params.len()));
        }
    }

    (predicate, params)
}

fn bind_all(
    mut query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: Vec<SqlParam>,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Uuid(value) => query.bind(value),
            SqlParam::Text(value) => query.bind(value),
            SqlParam::TextArray(values) => query.bind(values),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<AttributeRow, SessionError> {
    let decode = |e: sqlx::Error| SessionError::Decode(format!("failed to decode address row: {e}"));

    Ok(AttributeRow {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        application_id: ApplicationId::from_uuid(row.try_get("application_id").map_err(decode)?),
        address_id: AddressId::from_uuid(row.try_get("address_id").map_err(decode)?),
        address_key: row.try_get("address_key").map_err(decode)?,
        address_value: row.try_get("address_value").map_err(decode)?,
    })
}

/// Map SQLx errors to SessionError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SessionError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            SessionError::Statement(format!(
                "database error in {operation} (code {code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolTimedOut => {
            SessionError::Timeout(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            SessionError::Connection(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::Io(e) => SessionError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => SessionError::Connection(format!("tls error in {operation}: {e}")),
        sqlx::Error::Configuration(e) => {
            SessionError::Connection(format!("invalid configuration in {operation}: {e}"))
        }
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => {
            SessionError::Decode(format!("decode error in {operation}: {err}"))
        }
        _ => SessionError::Statement(format!("sqlx error in {operation}: {err}")),
    }
}
