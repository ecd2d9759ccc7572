//! The Description component: a human-readable term for a concept in one
//! language, typed as FSN, synonym or text definition.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Component, ComponentFields, concepts},
    store::{Doc, DocKind},
};

pub mod fields {
    pub const DESCRIPTION_ID: &str = "descriptionId";
    pub const CONCEPT_ID: &str = "conceptId";
    pub const TYPE_ID: &str = "typeId";
    pub const TERM: &str = "term";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    pub description_id: String,
    #[serde(flatten)]
    pub fields: ComponentFields,
    pub concept_id: String,
    pub language_code: String,
    pub type_id: String,
    pub term: String,
    pub case_significance_id: String,
}

impl Description {
    pub fn new(
        description_id: impl Into<String>,
        concept_id: impl Into<String>,
        type_id: impl Into<String>,
        term: impl Into<String>,
    ) -> Self {
        Self {
            description_id: description_id.into(),
            fields: ComponentFields {
                active: true,
                module_id: concepts::CORE_MODULE.to_string(),
                ..Default::default()
            },
            concept_id: concept_id.into(),
            language_code: "en".to_string(),
            type_id: type_id.into(),
            term: term.into(),
            case_significance_id: concepts::ENTIRE_TERM_CASE_SENSITIVE.to_string(),
        }
    }

    pub fn is_fsn(&self) -> bool {
        self.type_id == concepts::FSN
    }
}

impl Doc for Description {
    const KIND: DocKind = DocKind::Description;
    const ID_FIELD: &'static str = fields::DESCRIPTION_ID;

    fn doc_id(&self) -> &str {
        &self.description_id
    }
}

impl Component for Description {
    fn component_fields(&self) -> &ComponentFields {
        &self.fields
    }

    fn component_fields_mut(&mut self) -> &mut ComponentFields {
        &mut self.fields
    }

    fn release_hash_input(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.description_id,
            self.fields.active,
            self.fields.module_id,
            self.concept_id,
            self.language_code,
            self.type_id,
            self.term,
            self.case_significance_id
        )
    }
}
