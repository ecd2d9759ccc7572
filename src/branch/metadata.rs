//! Branch metadata: nested string maps carried on each branch.
//!
//! The `INTERNAL` and `AUTHOR_FLAGS` sub-maps hold well-known flags the
//! core reads and writes during imports and integrity checks. Metadata is a
//! plain value: listeners read it from the commit's branch snapshot and
//! write it back through the branch service, never holding live pointers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sub-map holding internal flags.
pub const INTERNAL: &str = "internal";
/// Sub-map holding author-facing flags.
pub const AUTHOR_FLAGS: &str = "authorFlags";

/// `INTERNAL` key: type of the running import on this branch.
pub const IMPORT_TYPE: &str = "importType";
/// `INTERNAL` key: set while a code system version is being imported.
pub const IMPORTING_CODE_SYSTEM_VERSION: &str = "importingCodeSystemVersion";
/// `INTERNAL` key: set while known integrity issues exist on the branch.
pub const INTEGRITY_ISSUE: &str = "integrityIssue";
/// `AUTHOR_FLAGS` key: marks commits made by batch tooling.
pub const BATCH_CHANGE: &str = "batch-change";
/// Top-level key: module applied to components maintained automatically.
pub const DEFAULT_MODULE_ID: &str = "defaultModuleId";

/// Nested branch metadata. Top-level values are either plain strings or
/// string sub-maps; only the two well-known sub-maps are nested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    maps: BTreeMap<String, BTreeMap<String, String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// A top-level string value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// A value inside a named sub-map.
    pub fn get_in(&self, map: &str, key: &str) -> Option<&str> {
        self.maps.get(map)?.get(key).map(String::as_str)
    }

    pub fn put_in(&mut self, map: &str, key: impl Into<String>, value: impl Into<String>) {
        self.maps
            .entry(map.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Remove a key from a sub-map, dropping the sub-map once empty.
    pub fn remove_in(&mut self, map: &str, key: &str) -> Option<String> {
        let entries = self.maps.get_mut(map)?;
        let removed = entries.remove(key);
        if entries.is_empty() {
            self.maps.remove(map);
        }
        removed
    }

    /// True when the flag is present with the literal value "true".
    pub fn flag_set(&self, map: &str, key: &str) -> bool {
        self.get_in(map, key) == Some("true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sub-map flags read back and disappear cleanly when removed.
    #[test]
    fn test_flags() {
        let mut metadata = Metadata::new();
        assert!(!metadata.flag_set(INTERNAL, INTEGRITY_ISSUE));

        metadata.put_in(INTERNAL, INTEGRITY_ISSUE, "true");
        assert!(metadata.flag_set(INTERNAL, INTEGRITY_ISSUE));

        metadata.remove_in(INTERNAL, INTEGRITY_ISSUE);
        assert!(!metadata.flag_set(INTERNAL, INTEGRITY_ISSUE));
        assert_eq!(metadata, Metadata::new());
    }

    /// Top-level values and sub-maps serialize independently.
    #[test]
    fn test_serialization() {
        let mut metadata = Metadata::new();
        metadata.put(DEFAULT_MODULE_ID, "900000000000207008");
        metadata.put_in(INTERNAL, IMPORT_TYPE, "DELTA");

        let json = serde_json::to_string(&metadata).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
        assert_eq!(back.get(DEFAULT_MODULE_ID), Some("900000000000207008"));
        assert_eq!(back.get_in(INTERNAL, IMPORT_TYPE), Some("DELTA"));
    }
}
