//! Code systems: the administrative record tying a terminology to the
//! branch it is maintained on, plus its published versions.
//!
//! Code systems are not branch-versioned components; they live in a
//! process-wide registry and are used to locate the owning system for a
//! branch and to record versions created by imports.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{branch::path, errors::TermError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    /// Short name, e.g. `SNOMEDCT` or `SNOMEDCT-XX`.
    pub short_name: String,
    /// The branch this system's content is maintained on.
    pub branch_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystemVersion {
    pub short_name: String,
    /// YYYYMMDD release date.
    pub effective_date: i32,
    /// Branch holding the versioned content snapshot.
    pub branch_path: String,
}

/// Registry of code systems and their versions.
#[derive(Default)]
pub struct CodeSystemService {
    systems: DashMap<String, CodeSystem>,
    versions: DashMap<String, Vec<CodeSystemVersion>>,
}

impl CodeSystemService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_code_system(
        &self,
        short_name: impl Into<String>,
        branch_path: impl Into<String>,
    ) -> CodeSystem {
        let code_system = CodeSystem {
            short_name: short_name.into(),
            branch_path: branch_path.into(),
        };
        self.systems
            .insert(code_system.short_name.clone(), code_system.clone());
        code_system
    }

    /// The code system maintained exactly on `branch_path`, if any.
    pub fn find_by_branch(&self, branch_path: &str) -> Option<CodeSystem> {
        self.systems
            .iter()
            .find(|entry| entry.branch_path == branch_path)
            .map(|entry| entry.clone())
    }

    /// The nearest code system at or above `branch_path`: the owning
    /// system for any task or project branch below it.
    pub fn find_closest_by_branch(&self, branch_path: &str) -> Option<CodeSystem> {
        self.systems
            .iter()
            .filter(|entry| path::is_descendant_or_equal(branch_path, &entry.branch_path))
            .max_by_key(|entry| entry.branch_path.len())
            .map(|entry| entry.clone())
    }

    /// Record a published version for a code system. The version branch
    /// name is derived from the release date.
    pub fn create_version(
        &self,
        code_system: &CodeSystem,
        effective_date: i32,
    ) -> Result<CodeSystemVersion, TermError> {
        if !self.systems.contains_key(&code_system.short_name) {
            return Err(TermError::Validation(format!(
                "unknown code system `{}`",
                code_system.short_name
            )));
        }
        let version = CodeSystemVersion {
            short_name: code_system.short_name.clone(),
            effective_date,
            branch_path: format!("{}/{}", code_system.branch_path, effective_date),
        };
        let mut versions = self.versions.entry(version.short_name.clone()).or_default();
        if versions.iter().any(|v| v.effective_date == effective_date) {
            return Err(TermError::Validation(format!(
                "version {effective_date} of `{}` already exists",
                code_system.short_name
            )));
        }
        info!(
            short_name = version.short_name.as_str(),
            effective_date, "code system version created"
        );
        versions.push(version.clone());
        versions.sort_by_key(|v| v.effective_date);
        Ok(version)
    }

    pub fn versions(&self, short_name: &str) -> Vec<CodeSystemVersion> {
        self.versions
            .get(short_name)
            .map(|versions| versions.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The owning system for a task branch is the nearest ancestor system.
    #[test]
    fn test_find_closest_by_branch() {
        let service = CodeSystemService::new();
        service.create_code_system("SNOMEDCT", "MAIN");
        service.create_code_system("SNOMEDCT-XX", "MAIN/SNOMEDCT-XX");

        let owner = service
            .find_closest_by_branch("MAIN/SNOMEDCT-XX/project/task")
            .unwrap();
        assert_eq!(owner.short_name, "SNOMEDCT-XX");

        let root_owner = service.find_closest_by_branch("MAIN/project").unwrap();
        assert_eq!(root_owner.short_name, "SNOMEDCT");
    }

    /// Versions are unique per release date and sorted.
    #[test]
    fn test_create_version() {
        let service = CodeSystemService::new();
        let system = service.create_code_system("SNOMEDCT", "MAIN");

        service.create_version(&system, 20230731).unwrap();
        service.create_version(&system, 20230131).unwrap();
        assert!(service.create_version(&system, 20230731).is_err());

        let versions = service.versions("SNOMEDCT");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].effective_date, 20230131);
        assert_eq!(versions[1].branch_path, "MAIN/20230731");
    }
}
