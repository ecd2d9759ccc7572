//! RF2 release ingestion.
//!
//! An RF2 archive is a set of tab-separated files, one per component table,
//! each with a header line naming its columns. The reader streams rows into
//! a [`ComponentFactory`] with one callback per component kind, and the
//! factory batches writes through persist buffers into an open commit.

pub mod buffer;
pub mod factory;
pub mod import;
pub mod patch;
pub mod reader;

use serde::{Deserialize, Serialize};

use crate::errors::TermError;

/// The three RF2 release file layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportType {
    Delta,
    Snapshot,
    Full,
}

impl ImportType {
    /// Metadata value written to the branch during the import.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Delta => "DELTA",
            ImportType::Snapshot => "SNAPSHOT",
            ImportType::Full => "FULL",
        }
    }

    /// Release-type token appearing in RF2 file names.
    pub fn file_token(&self) -> &'static str {
        match self {
            ImportType::Delta => "Delta",
            ImportType::Snapshot => "Snapshot",
            ImportType::Full => "Full",
        }
    }
}

/// Component tables of an RF2 release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rf2Table {
    Concept,
    Description,
    TextDefinition,
    StatedRelationship,
    Relationship,
    ConcreteRelationship,
    Identifier,
    RefsetMember,
}

impl Rf2Table {
    /// Detect the table from an RF2 file name, e.g.
    /// `sct2_Concept_Delta_INT_20230731.txt` or
    /// `der2_cissccRefset_MRCMAttributeDomainDelta_INT_20230731.txt`.
    pub fn detect(file_name: &str) -> Option<Rf2Table> {
        if file_name.contains("sct2_Concept_") {
            Some(Rf2Table::Concept)
        } else if file_name.contains("sct2_Description_") {
            Some(Rf2Table::Description)
        } else if file_name.contains("sct2_TextDefinition_") {
            Some(Rf2Table::TextDefinition)
        } else if file_name.contains("sct2_StatedRelationship_") {
            Some(Rf2Table::StatedRelationship)
        } else if file_name.contains("sct2_RelationshipConcreteValues_") {
            Some(Rf2Table::ConcreteRelationship)
        } else if file_name.contains("sct2_Relationship_") {
            Some(Rf2Table::Relationship)
        } else if file_name.contains("sct2_Identifier_") {
            Some(Rf2Table::Identifier)
        } else if file_name.starts_with("der2_") && file_name.contains("Refset_") {
            Some(Rf2Table::RefsetMember)
        } else {
            None
        }
    }

    /// The document kind rows of this table are stored as.
    pub fn doc_kind(&self) -> crate::store::DocKind {
        use crate::store::DocKind;
        match self {
            Rf2Table::Concept => DocKind::Concept,
            Rf2Table::Description | Rf2Table::TextDefinition => DocKind::Description,
            Rf2Table::StatedRelationship
            | Rf2Table::Relationship
            | Rf2Table::ConcreteRelationship => DocKind::Relationship,
            Rf2Table::Identifier => DocKind::Identifier,
            Rf2Table::RefsetMember => DocKind::ReferenceSetMember,
        }
    }

    /// Ingestion order: core component tables before dependent tables.
    pub fn dependency_order(&self) -> u8 {
        match self {
            Rf2Table::Concept => 0,
            Rf2Table::Description | Rf2Table::TextDefinition => 1,
            Rf2Table::StatedRelationship
            | Rf2Table::Relationship
            | Rf2Table::ConcreteRelationship => 2,
            Rf2Table::Identifier => 3,
            Rf2Table::RefsetMember => 4,
        }
    }

    /// Leading columns every file of this table must declare.
    pub fn expected_header(&self) -> &'static [&'static str] {
        match self {
            Rf2Table::Concept => &["id", "effectiveTime", "active", "moduleId", "definitionStatusId"],
            Rf2Table::Description | Rf2Table::TextDefinition => &[
                "id",
                "effectiveTime",
                "active",
                "moduleId",
                "conceptId",
                "languageCode",
                "typeId",
                "term",
                "caseSignificanceId",
            ],
            Rf2Table::StatedRelationship | Rf2Table::Relationship => &[
                "id",
                "effectiveTime",
                "active",
                "moduleId",
                "sourceId",
                "destinationId",
                "relationshipGroup",
                "typeId",
                "characteristicTypeId",
                "modifierId",
            ],
            Rf2Table::ConcreteRelationship => &[
                "id",
                "effectiveTime",
                "active",
                "moduleId",
                "sourceId",
                "value",
                "relationshipGroup",
                "typeId",
                "characteristicTypeId",
                "modifierId",
            ],
            Rf2Table::Identifier => &[
                "alternateIdentifier",
                "effectiveTime",
                "active",
                "moduleId",
                "identifierSchemeId",
                "referencedComponentId",
            ],
            Rf2Table::RefsetMember => &[
                "id",
                "effectiveTime",
                "active",
                "moduleId",
                "refsetId",
                "referencedComponentId",
            ],
        }
    }
}

/// Stated relationships dropped from every import to avoid double
/// ingestion with their inferred counterparts in historical international
/// releases. Tunable on purpose: remove entries as upstream data is fixed.
pub const STATED_RELATIONSHIPS_TO_SKIP: [&str; 3] = ["3187444026", "3192499027", "3574321020"];

/// Parse an RF2 effective time: exactly eight ASCII digits (`YYYYMMDD`).
/// Empty strings and pattern mismatches are null.
pub fn parse_effective_time(value: &str) -> Option<i32> {
    if value.len() != 8 || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// RF2 active column: `"1"` is active, anything else inactive.
pub fn parse_active(value: &str) -> bool {
    value == "1"
}

/// Push-style callback interface produced by the release reader, one
/// method per component kind. Raw column values are passed through;
/// implementations own the conversion rules.
pub trait ComponentFactory {
    fn new_concept_state(
        &mut self,
        concept_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        definition_status_id: &str,
    ) -> Result<(), TermError>;

    #[allow(clippy::too_many_arguments)]
    fn new_description_state(
        &mut self,
        description_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        concept_id: &str,
        language_code: &str,
        type_id: &str,
        term: &str,
        case_significance_id: &str,
    ) -> Result<(), TermError>;

    #[allow(clippy::too_many_arguments)]
    fn new_relationship_state(
        &mut self,
        relationship_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        destination_id: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
        stated: bool,
    ) -> Result<(), TermError>;

    #[allow(clippy::too_many_arguments)]
    fn new_concrete_relationship_state(
        &mut self,
        relationship_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        value: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> Result<(), TermError>;

    fn new_identifier_state(
        &mut self,
        alternate_identifier: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        identifier_scheme_id: &str,
        referenced_component_id: &str,
    ) -> Result<(), TermError>;

    #[allow(clippy::too_many_arguments)]
    fn new_reference_set_member_state(
        &mut self,
        field_names: &[String],
        member_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        refset_id: &str,
        referenced_component_id: &str,
        other_values: &[String],
    ) -> Result<(), TermError>;
}
