//! The PBS job subsystem: reading, materialising, caching, and watching
//! the on-disk `.JB` binary job files PBS writes under its spool
//! directory.
//!
//! # Components
//!
//! - [`codec`]: bit-exact decoder/encoder for the job file format, driven
//!   by the declarative [`schema`] over the typed [`Job`] record
//! - [`JobCache`]: concurrent, expiring map of live jobs
//! - [`JobWatcher`]: filesystem-event loop keeping the cache in sync
//!
//! At startup [`initialise_job_cache`] scans the spool directory once and
//! fills the cache; [`watch_pbs_jobs`] then runs forever, translating
//! create/write/remove events into cache mutations. Metric collectors poll
//! the cache through [`JobCache::get`] and [`JobCache::list`].

pub mod cache;
pub mod codec;
pub mod job;
pub mod schema;
pub mod value;
pub mod watcher;

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

pub use cache::JobCache;
pub use job::{Job, ResourceList, ResourcesUsed};
pub use watcher::JobWatcher;

/// Jobs directory relative to the PBS home.
pub const PBS_JOB_PATH: &str = "mom_priv/jobs";

/// Create the job cache, start its cleanup task, and populate it from the
/// spool directory. Fails if the jobs directory does not exist.
pub async fn initialise_job_cache(pbs_home: &Path) -> Result<Arc<JobCache>> {
    let cache = JobCache::new(cache::DEFAULT_GRACE_SECS);
    cache.spawn_cleanup(cache::DEFAULT_CLEANUP_INTERVAL);

    let job_path = pbs_home.join(PBS_JOB_PATH);
    let jobs = watcher::scan_job_files(&job_path).await?;
    for job in jobs {
        let job_id = job.job_id().to_string();
        cache.set(&job_id, job);
    }

    Ok(cache)
}

/// Watch the jobs directory forever, feeding decoded job files into the
/// cache. Returns only on error.
pub async fn watch_pbs_jobs(pbs_home: &Path, cache: Arc<JobCache>) -> Result<()> {
    let watch_path = pbs_home.join(PBS_JOB_PATH);
    let watcher = JobWatcher::new(&watch_path)?;

    watcher.run(cache).await
}
