//! Table accessors: statement builders for the primary and index tables.
//!
//! Accessors hold no connection. They only describe which rows a logical
//! operation touches; sessions execute the result.

use address_core::{AddressId, ApplicationId, TenantId};

use crate::session::{AttributeRow, KeyPredicate, RowFilter, Statement, TableName};

/// Three-part key identifying one address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AddressKey {
    pub tenant_id: TenantId,
    pub application_id: ApplicationId,
    pub address_id: AddressId,
}

impl AddressKey {
    pub fn new(tenant_id: TenantId, application_id: ApplicationId, address_id: AddressId) -> Self {
        Self {
            tenant_id,
            application_id,
            address_id,
        }
    }

    fn row(&self, name: &str, value: &str) -> AttributeRow {
        AttributeRow {
            tenant_id: self.tenant_id,
            application_id: self.application_id,
            address_id: self.address_id,
            address_key: name.to_string(),
            address_value: value.to_string(),
        }
    }

    fn filter(&self, address_key: KeyPredicate) -> RowFilter {
        RowFilter {
            tenant_id: self.tenant_id,
            application_id: self.application_id,
            address_id: Some(self.address_id),
            address_key,
        }
    }
}

/// Primary table accessor: `(tenant, application, address, key) -> value`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressTable;

impl AddressTable {
    const TABLE: TableName = TableName::Address;

    pub fn insert(key: &AddressKey, name: &str, value: &str) -> Statement {
        Statement::Insert {
            table: Self::TABLE,
            row: key.row(name, value),
        }
    }

    /// Delete every attribute of one address with a single range delete.
    pub fn delete_address(key: &AddressKey) -> Statement {
        Statement::Delete {
            table: Self::TABLE,
            filter: key.filter(KeyPredicate::Any),
        }
    }

    pub fn delete_attribute(key: &AddressKey, name: &str) -> Statement {
        Statement::Delete {
            table: Self::TABLE,
            filter: key.filter(KeyPredicate::Eq(name.to_string())),
        }
    }

    pub fn select_all(key: &AddressKey) -> Statement {
        Statement::Select {
            table: Self::TABLE,
            filter: key.filter(KeyPredicate::Any),
            limit: None,
        }
    }

    /// Select only the named attributes (`address_key IN (...)`).
    pub fn select_keys<S: AsRef<str>>(key: &AddressKey, names: &[S]) -> Statement {
        Statement::Select {
            table: Self::TABLE,
            filter: key.filter(KeyPredicate::In(
                names.iter().map(|n| n.as_ref().to_string()).collect(),
            )),
            limit: None,
        }
    }

    /// Fetch at most one row, to test whether the address exists.
    pub fn probe(key: &AddressKey) -> Statement {
        Statement::Select {
            table: Self::TABLE,
            filter: key.filter(KeyPredicate::Any),
            limit: Some(1),
        }
    }
}

/// Index table accessor: `(tenant, application, key, address) -> value`.
///
/// The key order does not allow a range delete across attribute names, so
/// rows are always removed one attribute at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressIndexTable;

impl AddressIndexTable {
    const TABLE: TableName = TableName::AddressIndex;

    pub fn insert(key: &AddressKey, name: &str, value: &str) -> Statement {
        Statement::Insert {
            table: Self::TABLE,
            row: key.row(name, value),
        }
    }

    pub fn delete_attribute(key: &AddressKey, name: &str) -> Statement {
        Statement::Delete {
            table: Self::TABLE,
            filter: key.filter(KeyPredicate::Eq(name.to_string())),
        }
    }

    /// Every address of one tenant application holding attribute `name`.
    pub fn select_by_key(
        tenant_id: TenantId,
        application_id: ApplicationId,
        name: &str,
    ) -> Statement {
        Statement::Select {
            table: Self::TABLE,
            filter: RowFilter {
                tenant_id,
                application_id,
                address_id: None,
                address_key: KeyPredicate::Eq(name.to_string()),
            },
            limit: None,
        }
    }
}
