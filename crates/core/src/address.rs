//! Address content: a free-form attribute map.
//!
//! An address has no intrinsic schema. Its content is a mapping from attribute
//! name (e.g. `"City"`, `"Line1"`) to a string value. Names are unique within
//! one address and insertion order is irrelevant, so the map is kept sorted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Attribute map of one address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address {
    details: BTreeMap<String, String>,
}

impl ValueObject for Address {}

impl Address {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_details(details: BTreeMap<String, String>) -> Self {
        Self { details }
    }

    /// Insert or overwrite one attribute, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.details.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.details.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.details.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.details.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn details(&self) -> &BTreeMap<String, String> {
        &self.details
    }

    pub fn into_details(self) -> BTreeMap<String, String> {
        self.details
    }

    /// Check that this map can be persisted: at least one attribute and no
    /// empty attribute names.
    pub fn validate_for_write(&self) -> DomainResult<()> {
        if self.details.is_empty() {
            return Err(DomainError::validation(
                "address does not contain any address key",
            ));
        }
        if self.details.keys().any(|k| k.is_empty()) {
            return Err(DomainError::validation("address key must not be empty"));
        }
        Ok(())
    }

    /// The restriction of this map to the given attribute names.
    ///
    /// Names not present in the map are ignored.
    pub fn restrict<S: AsRef<str>>(&self, names: &[S]) -> Address {
        names
            .iter()
            .filter_map(|n| {
                let n = n.as_ref();
                self.details.get(n).map(|v| (n.to_string(), v.clone()))
            })
            .collect()
    }

    /// Compute what must change to turn `self` into `desired`.
    pub fn diff(&self, desired: &Address) -> AddressDiff {
        let removed = self
            .details
            .keys()
            .filter(|k| !desired.details.contains_key(*k))
            .cloned()
            .collect();

        AddressDiff {
            removed,
            upserted: desired.clone(),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Address
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            details: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Difference between a stored address and its desired replacement.
///
/// `removed` are names present only in the stored map; `upserted` is the full
/// desired map (shared names are simply overwritten).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDiff {
    pub removed: BTreeSet<String>,
    pub upserted: Address,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn christchurch() -> Address {
        Address::from_iter([("City", "Christchurch"), ("Postcode", "8013")])
    }

    #[test]
    fn empty_map_is_rejected_for_write() {
        assert!(matches!(
            Address::new().validate_for_write(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn empty_key_is_rejected_for_write() {
        let address = Address::from_iter([("", "x")]);
        assert!(address.validate_for_write().is_err());
        assert!(christchurch().validate_for_write().is_ok());
    }

    #[test]
    fn insert_overwrites_and_map_accessors_agree() {
        let mut address = Address::new();
        assert_eq!(address.insert("City", "Christchurch"), None);
        assert_eq!(
            address.insert("City", "Wellington"),
            Some("Christchurch".to_string())
        );
        address.insert("Postcode", "6011");

        assert_eq!(address.get("City"), Some("Wellington"));
        assert_eq!(address.get("Country"), None);
        assert_eq!(address.details().len(), 2);

        let details = address.clone().into_details();
        assert_eq!(Address::from_details(details), address);
    }

    #[test]
    fn restrict_ignores_unknown_names() {
        let restricted = christchurch().restrict(&["City", "Country"]);
        assert_eq!(restricted, Address::from_iter([("City", "Christchurch")]));
    }

    #[test]
    fn diff_lists_only_names_missing_from_desired() {
        let desired = Address::from_iter([("Postcode", "8014"), ("Country", "NZ")]);
        let diff = christchurch().diff(&desired);

        assert_eq!(diff.removed, BTreeSet::from(["City".to_string()]));
        assert_eq!(diff.upserted, desired);
    }

    #[test]
    fn serializes_as_plain_map() {
        let json = serde_json::to_value(christchurch()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"City": "Christchurch", "Postcode": "8013"})
        );
    }

    proptest! {
        #[test]
        fn restrict_to_all_keys_is_identity(
            map in proptest::collection::btree_map("[A-Za-z]{1,8}", ".{0,12}", 1..8)
        ) {
            let address = Address::from_details(map);
            let keys: Vec<String> = address.keys().map(str::to_string).collect();
            prop_assert_eq!(address.restrict(&keys), address);
        }

        #[test]
        fn diff_removed_and_desired_are_disjoint(
            old in proptest::collection::btree_map("[a-d]{1,2}", "[0-9]{1,3}", 0..6),
            new in proptest::collection::btree_map("[a-d]{1,2}", "[0-9]{1,3}", 0..6),
        ) {
            let diff = Address::from_details(old.clone()).diff(&Address::from_details(new.clone()));
            for name in &diff.removed {
                prop_assert!(old.contains_key(name));
                prop_assert!(!new.contains_key(name));
            }
            prop_assert_eq!(diff.removed.len(), old.keys().filter(|k| !new.contains_key(*k)).count());
        }
    }
}
