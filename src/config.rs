use serde::{Deserialize, Serialize};

/// Tuning knobs for the core services.
///
/// `page_size` is the fixed large page used by every full scan so the store
/// streams hits instead of materialising them.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoreConfig {
    pub page_size: usize,
    pub import_job_ttl_minutes: i64,
    pub import_worker_threads: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            page_size: 10_000,
            import_job_ttl_minutes: 60,
            import_worker_threads: num_cpus::get(),
        }
    }
}
