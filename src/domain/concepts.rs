//! Well-known concept identifiers, consumed as opaque strings.

pub const ROOT_CONCEPT: &str = "138875005";
pub const IS_A: &str = "116680003";

pub const CORE_MODULE: &str = "900000000000207008";
pub const MODEL_MODULE: &str = "900000000000012004";

pub const PRIMITIVE: &str = "900000000000074008";
pub const FULLY_DEFINED: &str = "900000000000073002";

pub const FSN: &str = "900000000000003001";
pub const SYNONYM: &str = "900000000000013009";
pub const TEXT_DEFINITION: &str = "900000000000550004";
pub const ENTIRE_TERM_CASE_SENSITIVE: &str = "900000000000017005";

pub const STATED_RELATIONSHIP: &str = "900000000000010007";
pub const INFERRED_RELATIONSHIP: &str = "900000000000011006";
pub const ADDITIONAL_RELATIONSHIP: &str = "900000000000227009";
pub const EXISTENTIAL_RESTRICTION_MODIFIER: &str = "900000000000451002";

pub const OWL_AXIOM_REFERENCE_SET: &str = "733073007";

pub const MRCM_DOMAIN_REFERENCE_SET: &str = "723560006";
pub const MRCM_ATTRIBUTE_DOMAIN_REFERENCE_SET: &str = "723561005";
pub const MRCM_ATTRIBUTE_RANGE_REFERENCE_SET: &str = "723562003";

pub const CONCEPT_MODEL_OBJECT_ATTRIBUTE: &str = "762705008";
pub const CONCEPT_MODEL_DATA_ATTRIBUTE: &str = "762706009";
