//! The ReferenceSetMember component: membership of a component in a
//! reference set, with an open-ended tail of additional fields.
//!
//! The additional fields are an ordered string mapping so the RF2 column
//! order of the owning refset is preserved. OWL axioms are members of the
//! OWL axiom refset carrying their expression under the well-known
//! `owlExpression` key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Component, ComponentFields, concepts},
    store::{Doc, DocKind},
};

pub mod fields {
    pub const MEMBER_ID: &str = "memberId";
    pub const REFSET_ID: &str = "refsetId";
    pub const REFERENCED_COMPONENT_ID: &str = "referencedComponentId";
    pub const ADDITIONAL_FIELDS: &str = "additionalFields";
    pub const OWL_EXPRESSION: &str = "owlExpression";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSetMember {
    pub member_id: String,
    #[serde(flatten)]
    pub fields: ComponentFields,
    pub refset_id: String,
    pub referenced_component_id: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub additional_fields: IndexMap<String, String>,
}

impl ReferenceSetMember {
    pub fn new(
        member_id: impl Into<String>,
        refset_id: impl Into<String>,
        referenced_component_id: impl Into<String>,
    ) -> Self {
        Self {
            member_id: member_id.into(),
            fields: ComponentFields {
                active: true,
                module_id: concepts::CORE_MODULE.to_string(),
                ..Default::default()
            },
            refset_id: refset_id.into(),
            referenced_component_id: referenced_component_id.into(),
            additional_fields: IndexMap::new(),
        }
    }

    pub fn with_additional_field(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.additional_fields.insert(name.into(), value.into());
        self
    }

    pub fn additional_field(&self, name: &str) -> Option<&str> {
        self.additional_fields.get(name).map(String::as_str)
    }

    pub fn set_additional_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.additional_fields.insert(name.into(), value.into());
    }

    /// The OWL expression of an axiom member.
    pub fn owl_expression(&self) -> Option<&str> {
        self.additional_field(fields::OWL_EXPRESSION)
    }
}

impl Doc for ReferenceSetMember {
    const KIND: DocKind = DocKind::ReferenceSetMember;
    const ID_FIELD: &'static str = fields::MEMBER_ID;

    fn doc_id(&self) -> &str {
        &self.member_id
    }
}

impl Component for ReferenceSetMember {
    fn component_fields(&self) -> &ComponentFields {
        &self.fields
    }

    fn component_fields_mut(&mut self) -> &mut ComponentFields {
        &mut self.fields
    }

    fn release_hash_input(&self) -> String {
        let mut input = format!(
            "{}|{}|{}|{}|{}",
            self.member_id,
            self.fields.active,
            self.fields.module_id,
            self.refset_id,
            self.referenced_component_id
        );
        for (name, value) in &self.additional_fields {
            input.push('|');
            input.push_str(name);
            input.push('=');
            input.push_str(value);
        }
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Additional fields keep their insertion order through serialization.
    #[test]
    fn test_additional_field_order() {
        let member = ReferenceSetMember::new("m1", concepts::MRCM_ATTRIBUTE_RANGE_REFERENCE_SET, "363698007")
            .with_additional_field("rangeConstraint", "<< 442083009")
            .with_additional_field("attributeRule", "")
            .with_additional_field("ruleStrengthId", "723597001")
            .with_additional_field("contentTypeId", "723596005");

        let json = serde_json::to_string(&member).unwrap();
        let range_at = json.find("rangeConstraint").unwrap();
        let rule_at = json.find("attributeRule").unwrap();
        let strength_at = json.find("ruleStrengthId").unwrap();
        assert!(range_at < rule_at && rule_at < strength_at);
    }

    /// Changing an additional field invalidates the release hash match.
    #[test]
    fn test_release_hash_covers_additional_fields() {
        let mut member = ReferenceSetMember::new("m1", concepts::OWL_AXIOM_REFERENCE_SET, "100001")
            .with_additional_field("owlExpression", "SubClassOf(:100001 :138875005)");
        member.release(20230131);

        member.update_effective_time();
        assert_eq!(member.effective_time(), Some(20230131));

        member.set_additional_field("owlExpression", "SubClassOf(:100001 :404684003)");
        member.update_effective_time();
        assert_eq!(member.effective_time(), None);
    }
}
