//! The Identifier component: an alternate identifier for a component in an
//! external identifier scheme.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Component, ComponentFields, concepts},
    store::{Doc, DocKind},
};

pub mod fields {
    pub const ALTERNATE_IDENTIFIER: &str = "alternateIdentifier";
    pub const IDENTIFIER_SCHEME_ID: &str = "identifierSchemeId";
    pub const REFERENCED_COMPONENT_ID: &str = "referencedComponentId";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub alternate_identifier: String,
    #[serde(flatten)]
    pub fields: ComponentFields,
    pub identifier_scheme_id: String,
    pub referenced_component_id: String,
}

impl Identifier {
    pub fn new(
        alternate_identifier: impl Into<String>,
        identifier_scheme_id: impl Into<String>,
        referenced_component_id: impl Into<String>,
    ) -> Self {
        Self {
            alternate_identifier: alternate_identifier.into(),
            fields: ComponentFields {
                active: true,
                module_id: concepts::CORE_MODULE.to_string(),
                ..Default::default()
            },
            identifier_scheme_id: identifier_scheme_id.into(),
            referenced_component_id: referenced_component_id.into(),
        }
    }
}

impl Doc for Identifier {
    const KIND: DocKind = DocKind::Identifier;
    const ID_FIELD: &'static str = fields::ALTERNATE_IDENTIFIER;

    fn doc_id(&self) -> &str {
        &self.alternate_identifier
    }
}

impl Component for Identifier {
    fn component_fields(&self) -> &ComponentFields {
        &self.fields
    }

    fn component_fields_mut(&mut self) -> &mut ComponentFields {
        &mut self.fields
    }

    fn release_hash_input(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.alternate_identifier,
            self.fields.active,
            self.fields.module_id,
            self.identifier_scheme_id,
            self.referenced_component_id
        )
    }
}
