//! Machine-Readable Concept Model maintenance.
//!
//! The MRCM rulebook is expressed as three reference sets: domains,
//! attribute-domains and attribute-ranges. Together they constrain which
//! attributes may be applied to which concepts and with what ranges. The
//! derived artefacts (attribute rules and domain templates) are stored in
//! the members' additional fields and regenerated on every content commit
//! that touches the rulebook.

pub mod template;
pub mod updater;

use crate::domain::{concepts, refset_member::ReferenceSetMember};

/// The three rulebook reference sets.
pub const MRCM_REFSETS: [&str; 3] = [
    concepts::MRCM_DOMAIN_REFERENCE_SET,
    concepts::MRCM_ATTRIBUTE_DOMAIN_REFERENCE_SET,
    concepts::MRCM_ATTRIBUTE_RANGE_REFERENCE_SET,
];

/// Additional-field names of the MRCM reference sets.
pub mod fields {
    pub const DOMAIN_CONSTRAINT: &str = "domainConstraint";
    pub const PARENT_DOMAIN: &str = "parentDomain";
    pub const PROXIMAL_PRIMITIVE_CONSTRAINT: &str = "proximalPrimitiveConstraint";
    pub const PROXIMAL_PRIMITIVE_REFINEMENT: &str = "proximalPrimitiveRefinement";
    pub const DOMAIN_TEMPLATE_FOR_PRECOORDINATION: &str = "domainTemplateForPrecoordination";
    pub const DOMAIN_TEMPLATE_FOR_POSTCOORDINATION: &str = "domainTemplateForPostcoordination";
    pub const DOMAIN_ID: &str = "domainId";
    pub const GROUPED: &str = "grouped";
    pub const ATTRIBUTE_CARDINALITY: &str = "attributeCardinality";
    pub const ATTRIBUTE_IN_GROUP_CARDINALITY: &str = "attributeInGroupCardinality";
    pub const RULE_STRENGTH_ID: &str = "ruleStrengthId";
    pub const CONTENT_TYPE_ID: &str = "contentTypeId";
    pub const RANGE_CONSTRAINT: &str = "rangeConstraint";
    pub const ATTRIBUTE_RULE: &str = "attributeRule";
}

/// A domain rulebook entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MrcmDomain {
    pub member_id: String,
    /// The domain concept.
    pub referenced_component_id: String,
    pub domain_constraint: String,
    pub parent_domain: String,
    pub proximal_primitive_constraint: String,
    pub proximal_primitive_refinement: String,
}

impl MrcmDomain {
    pub fn from_member(member: &ReferenceSetMember) -> Self {
        let field = |name: &str| member.additional_field(name).unwrap_or_default().to_string();
        Self {
            member_id: member.member_id.clone(),
            referenced_component_id: member.referenced_component_id.clone(),
            domain_constraint: field(fields::DOMAIN_CONSTRAINT),
            parent_domain: field(fields::PARENT_DOMAIN),
            proximal_primitive_constraint: field(fields::PROXIMAL_PRIMITIVE_CONSTRAINT),
            proximal_primitive_refinement: field(fields::PROXIMAL_PRIMITIVE_REFINEMENT),
        }
    }
}

/// An attribute-domain rulebook entry: one attribute applicable in one
/// domain.
#[derive(Debug, Clone, PartialEq)]
pub struct MrcmAttributeDomain {
    pub member_id: String,
    /// The attribute concept.
    pub referenced_component_id: String,
    pub domain_id: String,
    pub grouped: bool,
    pub attribute_cardinality: String,
    pub attribute_in_group_cardinality: String,
    pub rule_strength_id: String,
    pub content_type_id: String,
}

impl MrcmAttributeDomain {
    pub fn from_member(member: &ReferenceSetMember) -> Self {
        let field = |name: &str| member.additional_field(name).unwrap_or_default().to_string();
        Self {
            member_id: member.member_id.clone(),
            referenced_component_id: member.referenced_component_id.clone(),
            domain_id: field(fields::DOMAIN_ID),
            grouped: member.additional_field(fields::GROUPED) == Some("1"),
            attribute_cardinality: field(fields::ATTRIBUTE_CARDINALITY),
            attribute_in_group_cardinality: field(fields::ATTRIBUTE_IN_GROUP_CARDINALITY),
            rule_strength_id: field(fields::RULE_STRENGTH_ID),
            content_type_id: field(fields::CONTENT_TYPE_ID),
        }
    }
}

/// An attribute-range rulebook entry: the permitted range of one
/// attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct MrcmAttributeRange {
    pub member_id: String,
    /// The attribute concept.
    pub referenced_component_id: String,
    pub range_constraint: String,
    pub attribute_rule: String,
    pub rule_strength_id: String,
    pub content_type_id: String,
}

impl MrcmAttributeRange {
    pub fn from_member(member: &ReferenceSetMember) -> Self {
        let field = |name: &str| member.additional_field(name).unwrap_or_default().to_string();
        Self {
            member_id: member.member_id.clone(),
            referenced_component_id: member.referenced_component_id.clone(),
            range_constraint: field(fields::RANGE_CONSTRAINT),
            attribute_rule: field(fields::ATTRIBUTE_RULE),
            rule_strength_id: field(fields::RULE_STRENGTH_ID),
            content_type_id: field(fields::CONTENT_TYPE_ID),
        }
    }
}

/// The active rulebook of a branch.
#[derive(Debug, Clone, Default)]
pub struct MrcmRulebook {
    pub domains: Vec<MrcmDomain>,
    pub attribute_domains: Vec<MrcmAttributeDomain>,
    pub attribute_ranges: Vec<MrcmAttributeRange>,
}

impl MrcmRulebook {
    /// Sort entries so generation is deterministic.
    pub fn sorted(mut self) -> Self {
        self.domains
            .sort_by(|a, b| a.referenced_component_id.cmp(&b.referenced_component_id));
        self.attribute_domains.sort_by(|a, b| {
            (&a.referenced_component_id, &a.domain_id)
                .cmp(&(&b.referenced_component_id, &b.domain_id))
        });
        self.attribute_ranges
            .sort_by(|a, b| a.referenced_component_id.cmp(&b.referenced_component_id));
        self
    }

    pub fn domain(&self, domain_id: &str) -> Option<&MrcmDomain> {
        self.domains
            .iter()
            .find(|domain| domain.referenced_component_id == domain_id)
    }
}
