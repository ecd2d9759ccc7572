//! The RF2 import coordinator.
//!
//! Import jobs are keyed by a generated opaque id and held in a
//! process-wide registry with no persistence; completed and failed jobs
//! are evicted after a configurable TTL. A job runs one ingestion end to
//! end: import metadata goes onto the branch, a commit opens, the release
//! reader drives the component factory, and the commit either finalises or
//! rolls back. Callbacks are never parallelised within one import; the
//! persist buffer ordering depends on the single-writer contract.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use threadpool::ThreadPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    branch::{BranchService, metadata},
    config::CoreConfig,
    domain::{code_system::CodeSystemService, fields},
    errors::TermError,
    rf2::{
        ImportType,
        factory::{ImportComponentFactory, ImportStats},
        patch::{PATCH_ALL_RELEASES, PatchConfig},
        reader::{DirectorySource, ModuleCutoffs, ReleaseReader, Rf2Source},
    },
    store::{DocKind, IndexStore, query::Query},
};

/// Import job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    WaitingForFile,
    Running,
    Completed,
    Failed,
}

/// Parameters of one import job.
#[derive(Debug, Clone)]
pub struct Rf2ImportConfiguration {
    pub import_type: ImportType,
    pub branch_path: String,
    /// Restrict ingestion to these modules; empty admits all.
    pub module_ids: HashSet<String>,
    pub create_code_system_version: bool,
    pub clear_effective_times: bool,
    /// Effective time a re-import may replace, or `-1` to disable the
    /// effective-time patcher entirely.
    pub patch_release_version: Option<i32>,
    pub internal_release: bool,
}

impl Rf2ImportConfiguration {
    pub fn new(import_type: ImportType, branch_path: impl Into<String>) -> Self {
        Self {
            import_type,
            branch_path: branch_path.into(),
            module_ids: HashSet::new(),
            create_code_system_version: false,
            clear_effective_times: false,
            patch_release_version: None,
            internal_release: false,
        }
    }
}

/// A registered import job.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub job_id: String,
    pub configuration: Rf2ImportConfiguration,
    pub status: ImportStatus,
    pub created_at: DateTime<Utc>,
    /// Greatest effective time observed by a completed run; the release
    /// version created when versioning was requested.
    pub max_effective_time: Option<i32>,
    pub skipped_components: HashMap<DocKind, usize>,
    pub error: Option<String>,
}

/// Coordinates RF2 imports over the branching substrate.
pub struct ImportService<S: IndexStore> {
    branching: Arc<BranchService<S>>,
    code_systems: Arc<CodeSystemService>,
    config: CoreConfig,
    jobs: DashMap<String, ImportJob>,
    pool: ThreadPool,
}

impl<S: IndexStore> ImportService<S> {
    pub fn new(
        branching: Arc<BranchService<S>>,
        code_systems: Arc<CodeSystemService>,
        config: CoreConfig,
    ) -> Self {
        let pool = ThreadPool::new(config.import_worker_threads.max(1));
        Self {
            branching,
            code_systems,
            config,
            jobs: DashMap::new(),
            pool,
        }
    }

    /// Validate a configuration and register a job waiting for its archive.
    pub fn create_job(&self, configuration: Rf2ImportConfiguration) -> Result<String, TermError> {
        if !self.branching.exists(&configuration.branch_path) {
            return Err(TermError::BranchNotFound(configuration.branch_path.clone()));
        }
        if let Some(patch_version) = configuration.patch_release_version
            && patch_version != PATCH_ALL_RELEASES
            && configuration.import_type != ImportType::Delta
        {
            return Err(TermError::Validation(
                "patch imports are only supported for DELTA archives".to_string(),
            ));
        }
        if configuration.import_type == ImportType::Full {
            if configuration.branch_path != crate::branch::path::MAIN {
                return Err(TermError::Validation(
                    "FULL imports are only supported on the root branch".to_string(),
                ));
            }
            if self.branch_has_content(&configuration.branch_path)? {
                return Err(TermError::Validation(
                    "FULL imports require an empty root branch".to_string(),
                ));
            }
        }
        if configuration.create_code_system_version
            && self
                .code_systems
                .find_by_branch(&configuration.branch_path)
                .is_none()
        {
            return Err(TermError::Validation(format!(
                "no code system exists on branch `{}`",
                configuration.branch_path
            )));
        }

        let job_id = Uuid::new_v4().to_string();
        self.jobs.insert(
            job_id.clone(),
            ImportJob {
                job_id: job_id.clone(),
                configuration,
                status: ImportStatus::WaitingForFile,
                created_at: Utc::now(),
                max_effective_time: None,
                skipped_components: HashMap::new(),
                error: None,
            },
        );
        Ok(job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Option<ImportJob> {
        self.jobs.get(job_id).map(|job| job.clone())
    }

    /// Run an import synchronously. Returns the release version created,
    /// when one was.
    pub fn start_import(
        &self,
        job_id: &str,
        source: &mut dyn Rf2Source,
    ) -> Result<Option<i32>, TermError> {
        let configuration = {
            let mut job = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| TermError::ImportJobNotFound(job_id.to_string()))?;
            job.status = ImportStatus::Running;
            job.configuration.clone()
        };
        info!(job_id, branch = configuration.branch_path.as_str(), "import started");

        match self.run_import(&configuration, source) {
            Ok(stats) => {
                let max_effective_time = stats.max_effective_time;
                if let Some(mut job) = self.jobs.get_mut(job_id) {
                    job.status = ImportStatus::Completed;
                    job.max_effective_time = max_effective_time;
                    job.skipped_components = stats.skipped_components;
                }
                info!(job_id, "import completed");
                Ok(max_effective_time)
            }
            Err(import_error) => {
                if let Some(mut job) = self.jobs.get_mut(job_id) {
                    job.status = ImportStatus::Failed;
                    job.error = Some(import_error.to_string());
                }
                error!(job_id, %import_error, "import failed");
                Err(import_error)
            }
        }
    }

    /// Run an import on the worker pool. The worker sets the job status;
    /// the caller polls [`ImportService::get_job`].
    pub fn start_import_async(self: &Arc<Self>, job_id: String, mut source: Box<dyn Rf2Source + Send>)
    where
        S: 'static,
    {
        let service = Arc::clone(self);
        self.pool.execute(move || {
            if let Err(import_error) = service.start_import(&job_id, source.as_mut()) {
                // Status and error are already recorded on the job.
                warn!(job_id = job_id.as_str(), %import_error, "async import worker finished with error");
            }
        });
    }

    /// Create a job and run it from an extracted release directory,
    /// skipping the waiting-for-file state.
    pub fn start_local_file_import(
        &self,
        configuration: Rf2ImportConfiguration,
        release_directory: impl Into<std::path::PathBuf>,
    ) -> Result<String, TermError> {
        let import_type = configuration.import_type;
        let job_id = self.create_job(configuration)?;
        let mut source = DirectorySource::new(release_directory, import_type);
        self.start_import(&job_id, &mut source)?;
        Ok(job_id)
    }

    /// Evict completed and failed jobs older than the configured TTL.
    pub fn purge_stale_jobs(&self) {
        let cutoff = Utc::now() - Duration::minutes(self.config.import_job_ttl_minutes);
        self.jobs.retain(|_, job| {
            !(matches!(job.status, ImportStatus::Completed | ImportStatus::Failed)
                && job.created_at < cutoff)
        });
    }

    fn branch_has_content(&self, branch_path: &str) -> Result<bool, TermError> {
        let criteria = self.branching.criteria_on_branch(branch_path)?;
        let mut cursor = self.branching.store().stream_rows(
            DocKind::Concept,
            &criteria.query_for(DocKind::Concept),
            1,
        )?;
        Ok(cursor.next().is_some())
    }

    fn run_import(
        &self,
        configuration: &Rf2ImportConfiguration,
        source: &mut dyn Rf2Source,
    ) -> Result<ImportStats, TermError> {
        self.write_import_metadata(configuration)?;
        let outcome = self.run_import_commit(configuration, source);
        self.clear_import_metadata(&configuration.branch_path)?;
        let stats = outcome?;

        if configuration.create_code_system_version
            && configuration.import_type != ImportType::Full
            && let Some(max_effective_time) = stats.max_effective_time
            && let Some(code_system) = self.code_systems.find_by_branch(&configuration.branch_path)
        {
            self.code_systems.create_version(&code_system, max_effective_time)?;
        }
        Ok(stats)
    }

    fn run_import_commit(
        &self,
        configuration: &Rf2ImportConfiguration,
        source: &mut dyn Rf2Source,
    ) -> Result<ImportStats, TermError> {
        let lock_context = format!("importing RF2 {}", configuration.import_type.as_str());
        let commit = self
            .branching
            .open_commit(&configuration.branch_path, &lock_context)?;

        let patch_config = PatchConfig {
            clear_effective_times: configuration.clear_effective_times,
            patch_release_version: configuration.patch_release_version,
            copy_release_fields: !configuration.create_code_system_version,
        };
        let mut reader = ReleaseReader::new().with_module_filter(configuration.module_ids.clone());

        let mut factory = match configuration.import_type {
            ImportType::Full => ImportComponentFactory::new_history_aware(
                &self.branching,
                commit,
                lock_context.clone(),
                self.config.page_size,
            )?,
            ImportType::Snapshot => {
                // The per-module cutoff pre-filters rows the patcher would
                // drop anyway; the disable sentinel turns both off.
                if configuration.patch_release_version != Some(PATCH_ALL_RELEASES) {
                    reader = reader.with_module_cutoffs(
                        self.compute_module_cutoffs(&configuration.branch_path)?,
                    );
                }
                ImportComponentFactory::new(
                    &self.branching,
                    commit,
                    patch_config,
                    self.config.page_size,
                )?
            }
            ImportType::Delta => ImportComponentFactory::new(
                &self.branching,
                commit,
                patch_config,
                self.config.page_size,
            )?,
        };

        match reader.read_release(source, configuration.import_type, &mut factory) {
            Ok(()) => factory.complete(),
            Err(read_error) => {
                factory.fail()?;
                Err(read_error)
            }
        }
    }

    /// The greatest effective time already present per module, for each
    /// component kind. Lets the reader drop rows a snapshot re-import
    /// would otherwise re-stage.
    fn compute_module_cutoffs(&self, branch_path: &str) -> Result<ModuleCutoffs, TermError> {
        let criteria = self.branching.criteria_on_branch(branch_path)?;
        let mut cutoffs = ModuleCutoffs::new();
        for kind in [
            DocKind::Concept,
            DocKind::Description,
            DocKind::Relationship,
            DocKind::Identifier,
            DocKind::ReferenceSetMember,
        ] {
            let query = Query::bool_query()
                .must(criteria.query_for(kind))
                .must(Query::exists(fields::EFFECTIVE_TIME))
                .build();
            for row in self
                .branching
                .store()
                .stream_rows(kind, &query, self.config.page_size)?
            {
                let module_id = row.source[fields::MODULE_ID].as_str().unwrap_or_default();
                if let Some(effective_time) =
                    row.source[fields::EFFECTIVE_TIME].as_i64().map(|et| et as i32)
                {
                    cutoffs.observe(kind, module_id, effective_time);
                }
            }
        }
        Ok(cutoffs)
    }

    fn write_import_metadata(&self, configuration: &Rf2ImportConfiguration) -> Result<(), TermError> {
        let branch = self.branching.branch(&configuration.branch_path)?;
        let mut branch_metadata = branch.metadata;
        branch_metadata.put_in(
            metadata::INTERNAL,
            metadata::IMPORT_TYPE,
            configuration.import_type.as_str(),
        );
        if configuration.import_type == ImportType::Full || configuration.create_code_system_version
        {
            branch_metadata.put_in(
                metadata::INTERNAL,
                metadata::IMPORTING_CODE_SYSTEM_VERSION,
                "true",
            );
        }
        if self
            .code_systems
            .find_closest_by_branch(&configuration.branch_path)
            .is_none()
        {
            branch_metadata.put_in(metadata::AUTHOR_FLAGS, metadata::BATCH_CHANGE, "true");
        }
        self.branching
            .update_metadata(&configuration.branch_path, branch_metadata)
    }

    fn clear_import_metadata(&self, branch_path: &str) -> Result<(), TermError> {
        let branch = self.branching.branch(branch_path)?;
        let mut branch_metadata = branch.metadata;
        branch_metadata.remove_in(metadata::INTERNAL, metadata::IMPORT_TYPE);
        branch_metadata.remove_in(metadata::INTERNAL, metadata::IMPORTING_CODE_SYSTEM_VERSION);
        branch_metadata.remove_in(metadata::AUTHOR_FLAGS, metadata::BATCH_CHANGE);
        self.branching.update_metadata(branch_path, branch_metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{branch::path::MAIN, store::memory::MemStore};

    fn service() -> ImportService<MemStore> {
        let store = Arc::new(MemStore::new());
        let branching = Arc::new(BranchService::new(store));
        branching.create_branch(MAIN).unwrap();
        ImportService::new(branching, Arc::new(CodeSystemService::new()), CoreConfig::default())
    }

    /// Job creation validates the branch and patch configuration.
    #[test]
    fn test_create_job_validations() {
        let import_service = service();

        let missing_branch =
            Rf2ImportConfiguration::new(ImportType::Delta, "MAIN/nowhere");
        assert!(matches!(
            import_service.create_job(missing_branch),
            Err(TermError::BranchNotFound(_))
        ));

        let mut snapshot_patch = Rf2ImportConfiguration::new(ImportType::Snapshot, MAIN);
        snapshot_patch.patch_release_version = Some(20230131);
        assert!(matches!(
            import_service.create_job(snapshot_patch),
            Err(TermError::Validation(_))
        ));

        // The disable sentinel is allowed for any import type.
        let mut snapshot_disable = Rf2ImportConfiguration::new(ImportType::Snapshot, MAIN);
        snapshot_disable.patch_release_version = Some(PATCH_ALL_RELEASES);
        assert!(import_service.create_job(snapshot_disable).is_ok());

        let mut versioned = Rf2ImportConfiguration::new(ImportType::Delta, MAIN);
        versioned.create_code_system_version = true;
        assert!(matches!(
            import_service.create_job(versioned),
            Err(TermError::Validation(_))
        ));
    }

    /// A new job waits for its file and is evicted once stale.
    #[test]
    fn test_job_lifecycle_and_purge() {
        let import_service = service();
        let job_id = import_service
            .create_job(Rf2ImportConfiguration::new(ImportType::Delta, MAIN))
            .unwrap();
        let job = import_service.get_job(&job_id).unwrap();
        assert_eq!(job.status, ImportStatus::WaitingForFile);

        import_service.purge_stale_jobs();
        assert!(import_service.get_job(&job_id).is_some());

        if let Some(mut job) = import_service.jobs.get_mut(&job_id) {
            job.status = ImportStatus::Completed;
            job.created_at = Utc::now() - Duration::minutes(120);
        }
        import_service.purge_stale_jobs();
        assert!(import_service.get_job(&job_id).is_none());
    }

    /// FULL imports are rejected off the root branch.
    #[test]
    fn test_full_import_requires_root() {
        let import_service = service();
        import_service.branching.create_branch("MAIN/project").unwrap();
        let configuration = Rf2ImportConfiguration::new(ImportType::Full, "MAIN/project");
        assert!(matches!(
            import_service.create_job(configuration),
            Err(TermError::Validation(_))
        ));
    }
}
