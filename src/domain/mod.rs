//! Domain model for terminology components.
//!
//! Every component shares the same envelope: an opaque id, an optional
//! `effectiveTime` (YYYYMMDD integer, null while unreleased), an `active`
//! flag and a `moduleId`, plus the release envelope (`released`,
//! `releaseHash`, `releasedEffectiveTime`) used to detect whether a
//! component still matches its last published state. Entity structs flatten
//! [`ComponentFields`] the way AI objects flatten their shared header in
//! the pack object model.

pub mod code_system;
pub mod concept;
pub mod concepts;
pub mod description;
pub mod identifier;
pub mod query_concept;
pub mod refset_member;
pub mod relationship;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Envelope field names as indexed.
pub mod fields {
    pub const ACTIVE: &str = "active";
    pub const EFFECTIVE_TIME: &str = "effectiveTime";
    pub const MODULE_ID: &str = "moduleId";
    pub const RELEASED: &str = "released";
}

/// Shared component and release envelope, flattened into every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<i32>,
    pub active: bool,
    pub module_id: String,
    #[serde(default)]
    pub released: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_effective_time: Option<i32>,
    /// Marks in-flight modifications for version control.
    #[serde(default)]
    pub changed: bool,
}

/// Behaviour shared by all versioned components.
pub trait Component {
    fn component_fields(&self) -> &ComponentFields;
    fn component_fields_mut(&mut self) -> &mut ComponentFields;

    /// Stable string over the fields frozen by a release. Two states with
    /// equal input hash to the same release hash.
    fn release_hash_input(&self) -> String;

    fn active(&self) -> bool {
        self.component_fields().active
    }

    fn effective_time(&self) -> Option<i32> {
        self.component_fields().effective_time
    }

    fn module_id(&self) -> &str {
        &self.component_fields().module_id
    }

    fn released(&self) -> bool {
        self.component_fields().released
    }

    fn mark_changed(&mut self) {
        self.component_fields_mut().changed = true;
    }

    fn build_release_hash(&self) -> String {
        hex::encode(Sha256::digest(self.release_hash_input().as_bytes()))
    }

    /// Stamp the release envelope for a published effective time.
    fn release(&mut self, effective_time: i32) {
        let hash = self.build_release_hash();
        let fields = self.component_fields_mut();
        fields.released = true;
        fields.release_hash = Some(hash);
        fields.released_effective_time = Some(effective_time);
        fields.effective_time = Some(effective_time);
    }

    /// Blank the envelope, making the component an unreleased edit.
    fn clear_release_details(&mut self) {
        let fields = self.component_fields_mut();
        fields.effective_time = None;
        fields.released = false;
        fields.release_hash = None;
        fields.released_effective_time = None;
    }

    /// Copy the release envelope from a previously released version.
    fn copy_release_details_from(&mut self, released: &ComponentFields) {
        let fields = self.component_fields_mut();
        fields.released = released.released;
        fields.release_hash = released.release_hash.clone();
        fields.released_effective_time = released.released_effective_time;
    }

    /// Re-derive `effectiveTime` from the release envelope: a component
    /// whose state equals its last release reuses that release's effective
    /// time, any other state is an unreleased edit.
    fn update_effective_time(&mut self) {
        let matches_release = self.released()
            && self.component_fields().release_hash.as_deref()
                == Some(self.build_release_hash().as_str());
        let fields = self.component_fields_mut();
        fields.effective_time = if matches_release {
            fields.released_effective_time
        } else {
            None
        };
    }
}
