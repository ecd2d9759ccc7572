//! The Relationship component: a typed, grouped edge from a source concept
//! to either a destination concept or, for concrete relationships, a
//! literal value.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Component, ComponentFields, concepts},
    store::{Doc, DocKind},
};

pub mod fields {
    pub const RELATIONSHIP_ID: &str = "relationshipId";
    pub const SOURCE_ID: &str = "sourceId";
    pub const DESTINATION_ID: &str = "destinationId";
    pub const TYPE_ID: &str = "typeId";
    pub const CHARACTERISTIC_TYPE_ID: &str = "characteristicTypeId";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub relationship_id: String,
    #[serde(flatten)]
    pub fields: ComponentFields,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    /// Concrete value, set instead of a destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub relationship_group: i32,
    pub type_id: String,
    pub characteristic_type_id: String,
    pub modifier_id: String,
}

impl Relationship {
    pub fn new(
        relationship_id: impl Into<String>,
        source_id: impl Into<String>,
        type_id: impl Into<String>,
        destination_id: impl Into<String>,
        characteristic_type_id: impl Into<String>,
    ) -> Self {
        Self {
            relationship_id: relationship_id.into(),
            fields: ComponentFields {
                active: true,
                module_id: concepts::CORE_MODULE.to_string(),
                ..Default::default()
            },
            source_id: source_id.into(),
            destination_id: Some(destination_id.into()),
            value: None,
            relationship_group: 0,
            type_id: type_id.into(),
            characteristic_type_id: characteristic_type_id.into(),
            modifier_id: concepts::EXISTENTIAL_RESTRICTION_MODIFIER.to_string(),
        }
    }

    pub fn new_concrete(
        relationship_id: impl Into<String>,
        source_id: impl Into<String>,
        type_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            relationship_id: relationship_id.into(),
            fields: ComponentFields {
                active: true,
                module_id: concepts::CORE_MODULE.to_string(),
                ..Default::default()
            },
            source_id: source_id.into(),
            destination_id: None,
            value: Some(value.into()),
            relationship_group: 0,
            type_id: type_id.into(),
            characteristic_type_id: concepts::INFERRED_RELATIONSHIP.to_string(),
            modifier_id: concepts::EXISTENTIAL_RESTRICTION_MODIFIER.to_string(),
        }
    }

    /// Derived: a relationship is concrete when it carries a value instead
    /// of a destination concept.
    pub fn is_concrete(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_inferred(&self) -> bool {
        self.characteristic_type_id == concepts::INFERRED_RELATIONSHIP
    }
}

impl Doc for Relationship {
    const KIND: DocKind = DocKind::Relationship;
    const ID_FIELD: &'static str = fields::RELATIONSHIP_ID;

    fn doc_id(&self) -> &str {
        &self.relationship_id
    }
}

impl Component for Relationship {
    fn component_fields(&self) -> &ComponentFields {
        &self.fields
    }

    fn component_fields_mut(&mut self) -> &mut ComponentFields {
        &mut self.fields
    }

    fn release_hash_input(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.relationship_id,
            self.fields.active,
            self.fields.module_id,
            self.source_id,
            self.destination_id.as_deref().unwrap_or_default(),
            self.value.as_deref().unwrap_or_default(),
            self.relationship_group,
            self.type_id,
            self.characteristic_type_id,
            self.modifier_id
        )
    }
}
