use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use address_core::{AddressId, ApplicationId, TenantId};

use super::{AttributeRow, KeyPredicate, RowFilter, Session, SessionError, Statement, TableName};

type PrimaryKey = (TenantId, ApplicationId, AddressId, String);
type IndexKey = (TenantId, ApplicationId, String, AddressId);

/// In-memory column-family session.
///
/// Intended for tests/dev. Both tables are kept in the key order of the
/// physical schema, and the index table only accepts per-attribute deletes,
/// like the real store.
///
/// Failures can be injected per attribute name or per table to exercise
/// partial fan-out behaviour.
#[derive(Debug, Default)]
pub struct InMemorySession {
    address: RwLock<BTreeMap<PrimaryKey, String>>,
    index: RwLock<BTreeMap<IndexKey, String>>,
    failing_keys: RwLock<HashSet<String>>,
    failing_tables: RwLock<HashSet<TableName>>,
    statements: AtomicUsize,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every statement that targets attribute `key` fail.
    pub fn fail_statements_for_key(&self, key: impl Into<String>) {
        if let Ok(mut keys) = self.failing_keys.write() {
            keys.insert(key.into());
        }
    }

    /// Make every statement against `table` fail.
    pub fn fail_table(&self, table: TableName) {
        if let Ok(mut tables) = self.failing_tables.write() {
            tables.insert(table);
        }
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        if let Ok(mut keys) = self.failing_keys.write() {
            keys.clear();
        }
        if let Ok(mut tables) = self.failing_tables.write() {
            tables.clear();
        }
    }

    /// Number of statements received so far (successful or not).
    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    /// Every row currently held by `table` for one tenant application.
    pub fn rows(
        &self,
        table: TableName,
        tenant_id: TenantId,
        application_id: ApplicationId,
    ) -> Vec<AttributeRow> {
        let filter = RowFilter {
            tenant_id,
            application_id,
            address_id: None,
            address_key: KeyPredicate::Any,
        };
        self.select(table, &filter, None).unwrap_or_default()
    }

    fn check_injected_failure(&self, statement: &Statement) -> Result<(), SessionError> {
        let table = statement.table();
        let table_fails = self
            .failing_tables
            .read()
            .map(|t| t.contains(&table))
            .unwrap_or(false);
        if table_fails {
            return Err(SessionError::Statement(format!(
                "injected failure on table {table}"
            )));
        }

        let keys = self.failing_keys.read().map_err(|_| poisoned())?;
        if let Some(key) = keys.iter().find(|k| statement.touches_key(k)) {
            return Err(SessionError::Statement(format!(
                "injected failure on key {key}"
            )));
        }
        Ok(())
    }

    fn insert(&self, table: TableName, row: AttributeRow) -> Result<(), SessionError> {
        match table {
            TableName::Address => {
                let mut rows = self.address.write().map_err(|_| poisoned())?;
                rows.insert(
                    (row.tenant_id, row.application_id, row.address_id, row.address_key),
                    row.address_value,
                );
            }
            TableName::AddressIndex => {
                let mut rows = self.index.write().map_err(|_| poisoned())?;
                rows.insert(
                    (row.tenant_id, row.application_id, row.address_key, row.address_id),
                    row.address_value,
                );
            }
        }
        Ok(())
    }

    fn delete(&self, table: TableName, filter: &RowFilter) -> Result<(), SessionError> {
        match table {
            TableName::Address => {
                if filter.address_id.is_none() {
                    return Err(SessionError::Statement(
                        "address rows must be deleted within one address".to_string(),
                    ));
                }
                let mut rows = self.address.write().map_err(|_| poisoned())?;
                rows.retain(|key, value| !filter.matches(&primary_row(key, value)));
            }
            TableName::AddressIndex => {
                if filter.address_id.is_none() || !matches!(filter.address_key, KeyPredicate::Eq(_))
                {
                    return Err(SessionError::Statement(
                        "index rows must be deleted one attribute at a time".to_string(),
                    ));
                }
                let mut rows = self.index.write().map_err(|_| poisoned())?;
                rows.retain(|key, value| !filter.matches(&index_row(key, value)));
            }
        }
        Ok(())
    }

    fn select(
        &self,
        table: TableName,
        filter: &RowFilter,
        limit: Option<u32>,
    ) -> Result<Vec<AttributeRow>, SessionError> {
        let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let rows: Vec<AttributeRow> = match table {
            TableName::Address => {
                let rows = self.address.read().map_err(|_| poisoned())?;
                rows.iter()
                    .map(|(k, v)| primary_row(k, v))
                    .filter(|r| filter.matches(r))
                    .take(limit)
                    .collect()
            }
            TableName::AddressIndex => {
                let rows = self.index.read().map_err(|_| poisoned())?;
                rows.iter()
                    .map(|(k, v)| index_row(k, v))
                    .filter(|r| filter.matches(r))
                    .take(limit)
                    .collect()
            }
        };
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl Session for InMemorySession {
    async fn execute(&self, statement: Statement) -> Result<(), SessionError> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(&statement)?;

        match statement {
            Statement::Insert { table, row } => self.insert(table, row),
            Statement::Delete { table, filter } => self.delete(table, &filter),
            Statement::Select { .. } => Err(SessionError::Statement(
                "select statements must be issued through query".to_string(),
            )),
        }
    }

    async fn query(&self, statement: Statement) -> Result<Vec<AttributeRow>, SessionError> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(&statement)?;

        match statement {
            Statement::Select { table, filter, limit } => self.select(table, &filter, limit),
            other => Err(SessionError::Statement(format!(
                "{} statements must be issued through execute",
                other.kind()
            ))),
        }
    }
}

fn primary_row(key: &PrimaryKey, value: &str) -> AttributeRow {
    let (tenant_id, application_id, address_id, address_key) = key;
    AttributeRow {
        tenant_id: *tenant_id,
        application_id: *application_id,
        address_id: *address_id,
        address_key: address_key.clone(),
        address_value: value.to_string(),
    }
}

fn index_row(key: &IndexKey, value: &str) -> AttributeRow {
    let (tenant_id, application_id, address_key, address_id) = key;
    AttributeRow {
        tenant_id: *tenant_id,
        application_id: *application_id,
        address_id: *address_id,
        address_key: address_key.clone(),
        address_value: value.to_string(),
    }
}

fn poisoned() -> SessionError {
    SessionError::Statement("lock poisoned".to_string())
}
