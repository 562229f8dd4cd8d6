//! Column-family session boundary.
//!
//! The storage engine never talks to a database directly. Table accessors
//! build typed [`Statement`]s, and a [`Session`] executes them. The session's
//! lifecycle (connect/close) belongs to whoever constructs it; the engine only
//! borrows it.
//!
//! ## Physical schema
//!
//! | Table | Columns | Key order |
//! |-------|---------|-----------|
//! | `address` | tenant_id, application_id, address_id, address_key, address_value | tenant, application, address, key |
//! | `address_indexed_by_address_key` | same | tenant, application, key, address |
//!
//! Both tables co-locate a tenant's application data. The index table answers
//! "which addresses hold attribute X" without scanning.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use address_core::{AddressId, ApplicationId, TenantId};
use thiserror::Error;

pub use in_memory::InMemorySession;
pub use postgres::PostgresSession;

/// The two physical tables backing addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TableName {
    /// Primary table, keyed to fetch every attribute of one address.
    Address,
    /// Index table, keyed to fetch every address holding one attribute name.
    AddressIndex,
}

impl TableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Address => "address",
            TableName::AddressIndex => "address_indexed_by_address_key",
        }
    }
}

impl core::fmt::Display for TableName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored attribute row. Both tables share this shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRow {
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub address_id: AddressId,
    pub address_key: String,
    pub address_value: String,
}

/// Restriction on the `address_key` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPredicate {
    Any,
    Eq(String),
    In(Vec<String>),
}

impl KeyPredicate {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPredicate::Any => true,
            KeyPredicate::Eq(k) => k == key,
            KeyPredicate::In(keys) => keys.iter().any(|k| k == key),
        }
    }

    /// Whether the predicate names `key` explicitly.
    pub fn names(&self, key: &str) -> bool {
        match self {
            KeyPredicate::Any => false,
            other => other.matches(key),
        }
    }
}

/// Row selection used by deletes and selects.
///
/// Tenant and application are always bound; the address id is optional so the
/// index table can be searched by attribute name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub address_id: Option<AddressId>,
    pub address_key: KeyPredicate,
}

impl RowFilter {
    pub fn matches(&self, row: &AttributeRow) -> bool {
        row.tenant_id == self.tenant_id
            && row.application_id == self.application_id
            && self.address_id.is_none_or(|id| id == row.address_id)
            && self.address_key.matches(&row.address_key)
    }
}

/// A single self-contained statement against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Insert (or overwrite) one attribute row.
    Insert { table: TableName, row: AttributeRow },
    Delete { table: TableName, filter: RowFilter },
    Select {
        table: TableName,
        filter: RowFilter,
        limit: Option<u32>,
    },
}

impl Statement {
    pub fn table(&self) -> TableName {
        match self {
            Statement::Insert { table, .. }
            | Statement::Delete { table, .. }
            | Statement::Select { table, .. } => *table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Insert { .. } => "insert",
            Statement::Delete { .. } => "delete",
            Statement::Select { .. } => "select",
        }
    }

    /// Whether this statement targets the attribute named `key`.
    pub fn touches_key(&self, key: &str) -> bool {
        match self {
            Statement::Insert { row, .. } => row.address_key == key,
            Statement::Delete { filter, .. } | Statement::Select { filter, .. } => {
                filter.address_key.names(key)
            }
        }
    }
}

impl core::fmt::Display for Statement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Statement::Insert { table, row } => write!(
                f,
                "insert into {table} (address_id={}, address_key={})",
                row.address_id, row.address_key
            ),
            Statement::Delete { table, filter } => write!(
                f,
                "delete from {table} (address_id={:?}, address_key={:?})",
                filter.address_id.map(|id| id.to_string()),
                filter.address_key
            ),
            Statement::Select { table, filter, limit } => write!(
                f,
                "select from {table} (address_id={:?}, address_key={:?}, limit={limit:?})",
                filter.address_id.map(|id| id.to_string()),
                filter.address_key
            ),
        }
    }
}

/// Session operation error.
///
/// These are **store errors** (connectivity, rejected statements, row decoding)
/// and are propagated verbatim to the repository's caller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("row decode failed: {0}")]
    Decode(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

/// Column-family client: executes self-contained statements.
///
/// Implementations must be safe to share across concurrently running
/// statements; the fan-out coordinator issues many at once on one session.
#[async_trait::async_trait]
pub trait Session: Send + Sync + 'static {
    /// Execute a mutation (`Insert` / `Delete`).
    async fn execute(&self, statement: Statement) -> Result<(), SessionError>;

    /// Execute a `Select` and collect every matching row.
    async fn query(&self, statement: Statement) -> Result<Vec<AttributeRow>, SessionError>;
}

#[async_trait::async_trait]
impl<S> Session for Arc<S>
where
    S: Session + ?Sized,
{
    async fn execute(&self, statement: Statement) -> Result<(), SessionError> {
        (**self).execute(statement).await
    }

    async fn query(&self, statement: Statement) -> Result<Vec<AttributeRow>, SessionError> {
        (**self).query(statement).await
    }
}
