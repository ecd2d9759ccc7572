//! The semantic-index row: one document per (branch, concept, stated or
//! inferred form) materialising the concept's ancestor closure and its
//! attribute map, used to accelerate ECL evaluation and integrity
//! analysis.
//!
//! The attribute map carries an `all` entry holding the union of every
//! attribute's destinations, so a single indexed field answers "does any
//! attribute of this concept point at one of these ids".

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::store::{Doc, DocKind};

/// Key of the union entry in the attribute map.
pub const ATTR_TYPE_WILDCARD: &str = "all";

pub mod fields {
    pub const CONCEPT_ID: &str = "conceptId";
    pub const CONCEPT_ID_FORM: &str = "conceptIdForm";
    pub const STATED: &str = "stated";
    pub const ANCESTORS: &str = "ancestors";
    pub const ATTR_ALL: &str = "attr.all";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConcept {
    /// Unique per (concept, form): `<conceptId>_s` or `<conceptId>_i`.
    pub concept_id_form: String,
    pub concept_id: String,
    pub stated: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ancestors: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attr: BTreeMap<String, BTreeSet<String>>,
}

impl QueryConcept {
    pub fn new(concept_id: impl Into<String>, stated: bool) -> Self {
        let concept_id = concept_id.into();
        Self {
            concept_id_form: format!("{}_{}", concept_id, if stated { "s" } else { "i" }),
            concept_id,
            stated,
            ancestors: BTreeSet::new(),
            attr: BTreeMap::new(),
        }
    }

    pub fn with_ancestors<I, V>(mut self, ancestors: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.ancestors = ancestors.into_iter().map(Into::into).collect();
        self
    }

    /// Record an attribute value, maintaining the `all` union entry.
    pub fn add_attribute(&mut self, type_id: impl Into<String>, destination_id: impl Into<String>) {
        let destination_id = destination_id.into();
        self.attr
            .entry(type_id.into())
            .or_default()
            .insert(destination_id.clone());
        self.attr
            .entry(ATTR_TYPE_WILDCARD.to_string())
            .or_default()
            .insert(destination_id);
    }

    /// Every attribute destination, from the union entry.
    pub fn attribute_destinations(&self) -> impl Iterator<Item = &str> {
        self.attr
            .get(ATTR_TYPE_WILDCARD)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

impl Doc for QueryConcept {
    const KIND: DocKind = DocKind::QueryConcept;
    const ID_FIELD: &'static str = fields::CONCEPT_ID_FORM;

    fn doc_id(&self) -> &str {
        &self.concept_id_form
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The `all` entry unions every attribute's destinations.
    #[test]
    fn test_attribute_wildcard_union() {
        let mut row = QueryConcept::new("195967001", true);
        row.add_attribute("116680003", "50043002");
        row.add_attribute("363698007", "955009");

        let all: Vec<&str> = row.attribute_destinations().collect();
        assert_eq!(all, vec!["50043002", "955009"]);
        assert_eq!(row.attr["116680003"].len(), 1);
    }

    /// Stated and inferred rows for one concept have distinct document ids.
    #[test]
    fn test_form_ids_distinct() {
        let stated = QueryConcept::new("195967001", true);
        let inferred = QueryConcept::new("195967001", false);
        assert_ne!(stated.concept_id_form, inferred.concept_id_form);
    }
}
