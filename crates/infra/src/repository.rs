//! Address repository: the public storage contract.
//!
//! Composes identifier generation, the two table accessors and the fan-out
//! coordinator into Create / Update / Read / ReadAll / Delete.
//!
//! ## Preconditions
//!
//! Missing identifiers (nil UUIDs), empty attribute maps, empty attribute
//! names and empty key lists are rejected with
//! [`AddressStoreError::Precondition`] before any statement reaches the
//! session.
//!
//! ## Consistency
//!
//! Existence checks run before any mutation, so a failed check never leaves a
//! partial write behind. Once a fan-out starts, its statements all run and
//! failures are aggregated; see [`crate::fan_out`].
//!
//! Concurrent calls against the same address are not serialized here.

use std::sync::Arc;

use thiserror::Error;
use tracing::{Span, field, info, instrument};

use address_core::{
    Address, AddressId, ApplicationId, DomainError, IdGenerator, IdGeneratorError, TenantId,
};

use crate::config::StoreConfig;
use crate::fan_out::{FanOut, FanOutError, MutationPlan};
use crate::session::{Session, SessionError, Statement};
use crate::tables::{AddressIndexTable, AddressKey, AddressTable};

/// Repository operation error.
#[derive(Debug, Error)]
pub enum AddressStoreError {
    /// Caller supplied invalid input; nothing was sent to the store.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The address has no rows at all.
    #[error("address not found. address id: {0}")]
    NotFound(AddressId),

    /// The address exists but holds none of the requested attribute names.
    #[error("address {address_id} has none of the requested keys: {}", .keys.join(", "))]
    AttributesNotFound {
        address_id: AddressId,
        keys: Vec<String>,
    },

    /// One or more row statements of a fan-out failed.
    #[error(transparent)]
    FanOut(#[from] FanOutError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    IdGenerator(#[from] IdGeneratorError),
}

impl AddressStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AddressStoreError::NotFound(_) | AddressStoreError::AttributesNotFound { .. }
        )
    }
}

impl From<DomainError> for AddressStoreError {
    fn from(value: DomainError) -> Self {
        AddressStoreError::Precondition(value.to_string())
    }
}

/// Tenant-scoped address storage contract.
#[async_trait::async_trait]
pub trait AddressStore: Send + Sync {
    /// Store a new address and return its generated identifier.
    async fn create(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address: Address,
    ) -> Result<AddressId, AddressStoreError>;

    /// Replace every attribute of an existing address with `address`.
    ///
    /// On failure the stored attributes are indeterminate; re-read to confirm.
    async fn update(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
        address: Address,
    ) -> Result<(), AddressStoreError>;

    /// Read only the named attributes of an address.
    async fn read(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
        keys: &[String],
    ) -> Result<Address, AddressStoreError>;

    /// Read every attribute of an address.
    async fn read_all(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
    ) -> Result<Address, AddressStoreError>;

    /// Remove an address from both tables.
    async fn delete(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
    ) -> Result<(), AddressStoreError>;

    /// Every address of a tenant application holding attribute `key`, with
    /// its value, served from the index table.
    async fn find_by_key(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        key: &str,
    ) -> Result<Vec<(AddressId, String)>, AddressStoreError>;
}

/// [`AddressStore`] over a column-family [`Session`].
///
/// The session is shared, not owned: opening and closing it is the caller's
/// job.
pub struct AddressRepository<S: ?Sized, G> {
    session: Arc<S>,
    generator: G,
    fan_out: FanOut,
}

impl<S, G> AddressRepository<S, G>
where
    S: Session + ?Sized,
    G: IdGenerator,
{
    pub fn new(session: Arc<S>, generator: G) -> Self {
        Self {
            session,
            generator,
            fan_out: FanOut::default(),
        }
    }

    pub fn from_config(session: Arc<S>, generator: G, config: &StoreConfig) -> Self {
        Self::new(session, generator).with_fan_out(FanOut::from_config(config))
    }

    pub fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    async fn load(&self, statement: Statement) -> Result<Address, SessionError> {
        let rows = self.session.query(statement).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.address_key, row.address_value))
            .collect())
    }

    async fn exists(&self, key: &AddressKey) -> Result<bool, SessionError> {
        let rows = self.session.query(AddressTable::probe(key)).await?;
        Ok(!rows.is_empty())
    }

    async fn load_existing(&self, key: &AddressKey) -> Result<Address, AddressStoreError> {
        let address = self.load(AddressTable::select_all(key)).await?;
        if address.is_empty() {
            return Err(AddressStoreError::NotFound(key.address_id));
        }
        Ok(address)
    }
}

fn require_scope(tenant_id: TenantId, application_id: ApplicationId) -> Result<(), AddressStoreError> {
    if tenant_id.is_nil() {
        return Err(AddressStoreError::Precondition(
            "tenant_id must be provided".to_string(),
        ));
    }
    if application_id.is_nil() {
        return Err(AddressStoreError::Precondition(
            "application_id must be provided".to_string(),
        ));
    }
    Ok(())
}

fn require_key(
    tenant_id: TenantId,
    application_id: ApplicationId,
    address_id: AddressId,
) -> Result<AddressKey, AddressStoreError> {
    require_scope(tenant_id, application_id)?;
    if address_id.is_nil() {
        return Err(AddressStoreError::Precondition(
            "address_id must be provided".to_string(),
        ));
    }
    Ok(AddressKey::new(tenant_id, application_id, address_id))
}

fn require_keys(keys: &[String]) -> Result<(), AddressStoreError> {
    if keys.is_empty() {
        return Err(AddressStoreError::Precondition(
            "at least one address key must be requested".to_string(),
        ));
    }
    if keys.iter().any(String::is_empty) {
        return Err(AddressStoreError::Precondition(
            "address key must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[async_trait::async_trait]
impl<S, G> AddressStore for AddressRepository<S, G>
where
    S: Session + ?Sized,
    G: IdGenerator,
{
    #[instrument(
        skip(self, address),
        fields(
            tenant_id = %tenant_id,
            application_id = %application_id,
            address_id = field::Empty,
            attributes = address.len()
        ),
        err
    )]
    async fn create(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address: Address,
    ) -> Result<AddressId, AddressStoreError> {
        require_scope(tenant_id, application_id)?;
        address.validate_for_write()?;

        let address_id = self.generator.generate()?;
        Span::current().record("address_id", field::display(address_id));

        let key = AddressKey::new(tenant_id, application_id, address_id);
        self.fan_out
            .run(&self.session, MutationPlan::write(&key, &address))
            .await?;

        info!("address created");
        Ok(address_id)
    }

    #[instrument(
        skip(self, address),
        fields(
            tenant_id = %tenant_id,
            application_id = %application_id,
            address_id = %address_id,
            attributes = address.len()
        ),
        err
    )]
    async fn update(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
        address: Address,
    ) -> Result<(), AddressStoreError> {
        let key = require_key(tenant_id, application_id, address_id)?;
        address.validate_for_write()?;

        let current = self.load_existing(&key).await?;
        let plan = MutationPlan::reconcile(&key, &current, &address);
        self.fan_out.run(&self.session, plan).await?;

        info!(replaced = current.len(), "address updated");
        Ok(())
    }

    #[instrument(
        skip(self, keys),
        fields(
            tenant_id = %tenant_id,
            application_id = %application_id,
            address_id = %address_id,
            requested = keys.len()
        ),
        err
    )]
    async fn read(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
        keys: &[String],
    ) -> Result<Address, AddressStoreError> {
        let key = require_key(tenant_id, application_id, address_id)?;
        require_keys(keys)?;

        let found = self.load(AddressTable::select_keys(&key, keys)).await?;
        if !found.is_empty() {
            return Ok(found);
        }

        // Nothing matched: tell an absent address apart from absent keys.
        if self.exists(&key).await? {
            Err(AddressStoreError::AttributesNotFound {
                address_id,
                keys: keys.to_vec(),
            })
        } else {
            Err(AddressStoreError::NotFound(address_id))
        }
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id,
            application_id = %application_id,
            address_id = %address_id
        ),
        err
    )]
    async fn read_all(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
    ) -> Result<Address, AddressStoreError> {
        let key = require_key(tenant_id, application_id, address_id)?;
        self.load_existing(&key).await
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id,
            application_id = %application_id,
            address_id = %address_id
        ),
        err
    )]
    async fn delete(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        address_id: AddressId,
    ) -> Result<(), AddressStoreError> {
        let key = require_key(tenant_id, application_id, address_id)?;

        // Index rows can only be removed per attribute, so the names are needed first.
        let current = self.load_existing(&key).await?;
        self.fan_out
            .run(&self.session, MutationPlan::delete(&key, current.keys()))
            .await?;

        info!(removed = current.len(), "address deleted");
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id, application_id = %application_id),
        err
    )]
    async fn find_by_key(
        &self,
        tenant_id: TenantId,
        application_id: ApplicationId,
        key: &str,
    ) -> Result<Vec<(AddressId, String)>, AddressStoreError> {
        require_scope(tenant_id, application_id)?;
        if key.is_empty() {
            return Err(AddressStoreError::Precondition(
                "address key must not be empty".to_string(),
            ));
        }

        let rows = self
            .session
            .query(AddressIndexTable::select_by_key(tenant_id, application_id, key))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.address_id, row.address_value))
            .collect())
    }
}
