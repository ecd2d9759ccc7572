//! Reference-integrity analysis.
//!
//! The integrity engine detects dangling references: active non-inferred
//! relationships and OWL axioms that point at concepts which are missing
//! or inactive on a branch. It never mutates content; its only side effect
//! is clearing the branch-metadata integrity flag after a verified fix.

pub mod axiom;
pub mod service;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compact concept descriptor used to make axiom findings readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMini {
    pub concept_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pt: Option<String>,
    #[serde(flatten)]
    pub extra_fields: BTreeMap<String, Value>,
}

/// Extra-field key listing the concepts an axiom dangles on.
pub const MISSING_OR_INACTIVE_CONCEPTS: &str = "missingOrInactiveConcepts";

impl ConceptMini {
    pub fn new(concept_id: impl Into<String>) -> Self {
        Self {
            concept_id: concept_id.into(),
            fsn: None,
            pt: None,
            extra_fields: BTreeMap::new(),
        }
    }

    /// Attach the sorted list of missing-or-inactive concept ids.
    pub fn set_missing_or_inactive_concepts(&mut self, concept_ids: Vec<String>) {
        self.extra_fields.insert(
            MISSING_OR_INACTIVE_CONCEPTS.to_string(),
            Value::Array(concept_ids.into_iter().map(Value::String).collect()),
        );
    }

    pub fn missing_or_inactive_concepts(&self) -> Vec<&str> {
        self.extra_fields
            .get(MISSING_OR_INACTIVE_CONCEPTS)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect()
    }
}

/// The integrity findings of one analysis run. Empty sub-maps are omitted
/// from the serialized form; the report is empty iff all four are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships_with_missing_or_inactive_source: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships_with_missing_or_inactive_type: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships_with_missing_or_inactive_destination: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub axioms_with_missing_or_inactive_referenced_concept: BTreeMap<String, ConceptMini>,
}

impl IntegrityReport {
    pub fn is_empty(&self) -> bool {
        self.relationships_with_missing_or_inactive_source.is_empty()
            && self.relationships_with_missing_or_inactive_type.is_empty()
            && self
                .relationships_with_missing_or_inactive_destination
                .is_empty()
            && self
                .axioms_with_missing_or_inactive_referenced_concept
                .is_empty()
    }
}

/// Stale semantic-index rows found by the cross-check: concept ids present
/// in the index but not active on the branch, split by form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticIndexExtras {
    pub stated: Vec<String>,
    pub inferred: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Empty sub-maps vanish from the serialized report.
    #[test]
    fn test_empty_maps_omitted() {
        let mut report = IntegrityReport::default();
        assert_eq!(serde_json::to_string(&report).unwrap(), "{}");
        assert!(report.is_empty());

        report
            .relationships_with_missing_or_inactive_destination
            .insert("7000".to_string(), "100000".to_string());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["relationshipsWithMissingOrInactiveDestination"]["7000"],
            "100000"
        );
        assert!(json.get("relationshipsWithMissingOrInactiveSource").is_none());
        assert!(!report.is_empty());
    }

    /// Axiom entries expose their dangling concepts through extra fields.
    #[test]
    fn test_concept_mini_extra_fields() {
        let mut mini = ConceptMini::new("195967001");
        mini.fsn = Some("Asthma (disorder)".to_string());
        mini.set_missing_or_inactive_concepts(vec!["955009".to_string()]);

        let json = serde_json::to_value(&mini).unwrap();
        assert_eq!(json["conceptId"], "195967001");
        assert_eq!(json["missingOrInactiveConcepts"][0], "955009");
        assert_eq!(mini.missing_or_inactive_concepts(), vec!["955009"]);
    }
}
