//! The Concept component: the unit of meaning in the ontology. Carries
//! only its definition status beyond the shared envelope; the meaning
//! itself lives in descriptions, relationships and axioms.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Component, ComponentFields, concepts},
    store::{Doc, DocKind},
};

pub mod fields {
    pub const CONCEPT_ID: &str = "conceptId";
    pub const DEFINITION_STATUS_ID: &str = "definitionStatusId";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub concept_id: String,
    #[serde(flatten)]
    pub fields: ComponentFields,
    pub definition_status_id: String,
}

impl Concept {
    /// A primitive concept with the given activity state.
    pub fn new(concept_id: impl Into<String>, module_id: impl Into<String>, active: bool) -> Self {
        Self {
            concept_id: concept_id.into(),
            fields: ComponentFields {
                active,
                module_id: module_id.into(),
                ..Default::default()
            },
            definition_status_id: concepts::PRIMITIVE.to_string(),
        }
    }
}

impl Doc for Concept {
    const KIND: DocKind = DocKind::Concept;
    const ID_FIELD: &'static str = fields::CONCEPT_ID;

    fn doc_id(&self) -> &str {
        &self.concept_id
    }
}

impl Component for Concept {
    fn component_fields(&self) -> &ComponentFields {
        &self.fields
    }

    fn component_fields_mut(&mut self) -> &mut ComponentFields {
        &mut self.fields
    }

    fn release_hash_input(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.concept_id, self.fields.active, self.fields.module_id, self.definition_status_id
        )
    }
}
