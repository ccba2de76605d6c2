use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::job::Job;

/// Extra lifetime granted to a cached job after its walltime elapses or its
/// file is removed, keeping it visible to one final metric scrape.
pub const DEFAULT_GRACE_SECS: i64 = 60;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug)]
struct CachedJob {
    job: Job,
    expiration: i64,
    is_running: bool,
}

/// Thread-safe, time-bounded map of live PBS jobs.
///
/// The map is guarded by a single readers-writer lock; no operation holds
/// the lock across I/O. A background task removes entries that are both
/// stale and no longer running.
#[derive(Debug)]
pub struct JobCache {
    jobs: RwLock<HashMap<String, CachedJob>>,
    grace: i64,
}

fn epoch_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl JobCache {
    pub fn new(grace: i64) -> Arc<Self> {
        Arc::new(JobCache {
            jobs: RwLock::new(HashMap::new()),
            grace,
        })
    }

    /// Spawn the periodic cleanup task for this cache.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.cleanup();
            }
        })
    }

    /// Remove stale jobs. Entries still marked running are never removed
    /// here: PBS sometimes leaves running-but-over-walltime jobs, and those
    /// must stay visible until their file is deleted.
    fn cleanup(&self) {
        let now = epoch_now();
        let mut jobs = self.jobs.write().expect("job cache lock poisoned");

        jobs.retain(|job_id, cached| {
            let keep = cached.is_running || cached.expiration >= now;
            if !keep {
                tracing::debug!(job_id = %job_id, expiration = cached.expiration, "Cleanup: deleting job from cache");
            }
            keep
        });
    }

    pub fn list(&self) -> Vec<Job> {
        let now = epoch_now();
        let jobs = self.jobs.read().expect("job cache lock poisoned");

        let active: Vec<Job> = jobs
            .values()
            .filter(|cached| cached.expiration >= now)
            .map(|cached| cached.job.clone())
            .collect();
        tracing::debug!(count = jobs.len(), active = active.len(), "List: jobs in cache");

        active
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        let now = epoch_now();
        let jobs = self.jobs.read().expect("job cache lock poisoned");

        let cached = jobs.get(job_id)?;
        if cached.expiration < now {
            tracing::debug!(job_id, expiration = cached.expiration, "Get: job expired in cache");
            return None;
        }

        Some(cached.job.clone())
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        let jobs = self.jobs.read().expect("job cache lock poisoned");

        jobs.get(job_id).map(|cached| cached.is_running).unwrap_or(false)
    }

    /// Insert or replace a job, marking it running. Jobs whose expiration
    /// is already in the past are dropped, not stored.
    pub fn set(&self, job_id: &str, job: Job) {
        let now = epoch_now();

        if job_id.is_empty() {
            tracing::debug!("Set: job id is empty, not setting in cache");
            return;
        }

        // Recompute the expiration on every set; qalter can change the
        // requested walltime of a running job.
        let expiration = job.stime + job.requested_walltime() + self.grace;
        if expiration < now {
            tracing::debug!(job_id, expiration, now, "Set: job expiration is in the past, not setting in cache");
            return;
        }

        let mut jobs = self.jobs.write().expect("job cache lock poisoned");
        tracing::debug!(job_id, expiration, "Set: job set in cache");
        jobs.insert(
            job_id.to_string(),
            CachedJob {
                job,
                expiration,
                is_running: true,
            },
        );
    }

    /// A deleted job that is still marked running is kept visible through
    /// the grace window; a stale one is removed immediately.
    pub fn delete(&self, job_id: &str) {
        let now = epoch_now();
        let mut jobs = self.jobs.write().expect("job cache lock poisoned");

        if let Some(cached) = jobs.get_mut(job_id) {
            if cached.is_running {
                tracing::debug!(job_id, "Delete: job is still running, updating expiration");
                cached.is_running = false;
                cached.expiration = now + self.grace;
            } else if cached.expiration < now {
                tracing::debug!(job_id, "Delete: deleting job from cache");
                jobs.remove(job_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job(hashname: &str, stime: i64, walltime: &str) -> Job {
        let mut job = Job::default();
        job.hashname = hashname.to_string();
        job.stime = stime;
        job.resource_list.walltime = walltime.to_string();
        job
    }

    fn insert_raw(cache: &JobCache, job_id: &str, job: Job, expiration: i64, is_running: bool) {
        cache.jobs.write().unwrap().insert(
            job_id.to_string(),
            CachedJob {
                job,
                expiration,
                is_running,
            },
        );
    }

    /// Job 1000 runs and is unexpired, 1001 is stale, 1002 expires right now.
    fn load_test_cache() -> Arc<JobCache> {
        let now = epoch_now();
        let cache = JobCache::new(60);

        insert_raw(&cache, "1000", test_job("1000.pbs", now, "00:00:01"), now + 60, true);
        insert_raw(&cache, "1001", test_job("1001.pbs", now - 1000, "00:00:01"), now - 600, false);
        insert_raw(&cache, "1002", test_job("1002.pbs", now - 60, "00:00:01"), now, false);

        cache
    }

    #[test]
    fn test_cleanup() {
        let cache = load_test_cache();

        cache.cleanup();
        let jobs = cache.jobs.read().unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(!jobs.contains_key("1001"), "stale job 1001 should have been removed");
    }

    // PBS removes jobs exceeding walltime periodically; cleanup must keep
    // running jobs even when they are past their expiration.
    #[test]
    fn test_cleanup_walltime_race() {
        let cache = load_test_cache();
        let now = epoch_now();

        {
            let mut jobs = cache.jobs.write().unwrap();
            let cached = jobs.get_mut("1000").unwrap();
            cached.expiration -= 86_400;
            assert!(cached.expiration < now);
        }

        cache.cleanup();
        assert!(cache.jobs.read().unwrap().contains_key("1000"));
    }

    #[test]
    fn test_list() {
        let cache = load_test_cache();

        let jobs = cache.list();
        let mut ids: Vec<&str> = jobs.iter().map(|j| j.job_id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["1000", "1002"]);
    }

    #[test]
    fn test_get() {
        let cache = load_test_cache();

        assert!(cache.get("1000").is_some());
        assert!(cache.get("1001").is_none(), "expired job should not be returned");
        assert!(cache.get("1002").is_some(), "expiration equal to now is still live");
        assert!(cache.get("9999").is_none());

        // expired entries are reported missing but not removed
        assert!(cache.jobs.read().unwrap().contains_key("1001"));
    }

    #[test]
    fn test_is_running() {
        let cache = load_test_cache();

        assert!(cache.is_running("1000"));
        assert!(!cache.is_running("1001"));
        assert!(!cache.is_running("9999"));
    }

    #[test]
    fn test_set() {
        let now = epoch_now();
        let cache = JobCache::new(60);

        cache.set("1000", test_job("1000.pbs", now, "00:00:01"));
        assert!(cache.get("1000").is_some());
        assert!(cache.is_running("1000"));

        // expiration already in the past: dropped, not stored
        cache.set("1001", test_job("1001.pbs", now - 1001, "00:00:01"));
        assert!(!cache.jobs.read().unwrap().contains_key("1001"));

        // a zero-value job has stime 0, an expiration far in the past
        cache.set("1003", Job::default());
        assert!(!cache.jobs.read().unwrap().contains_key("1003"));

        cache.set("", test_job("x.pbs", now, "00:00:01"));
        assert!(!cache.jobs.read().unwrap().contains_key(""));
    }

    #[test]
    fn test_delete() {
        let cache = load_test_cache();
        let now = epoch_now();

        // deleting a running job flips it to not-running and grants grace
        cache.delete("1000");
        {
            let jobs = cache.jobs.read().unwrap();
            let cached = jobs.get("1000").unwrap();
            assert!(!cached.is_running);
            assert!(cached.expiration >= now + 59);
        }

        // deleting a stale job removes it
        cache.delete("1001");
        assert!(!cache.jobs.read().unwrap().contains_key("1001"));

        // not yet stale: kept until cleanup after the grace window
        cache.delete("1002");
        assert!(cache.jobs.read().unwrap().contains_key("1002"));

        // absent id is a no-op
        cache.delete("9999");
    }

    #[test]
    fn test_delete_then_set_revives() {
        let now = epoch_now();
        let cache = JobCache::new(60);

        cache.set("1000", test_job("1000.pbs", now, "00:10:00"));
        cache.delete("1000");
        assert!(!cache.is_running("1000"));

        cache.set("1000", test_job("1000.pbs", now, "00:10:00"));
        assert!(cache.is_running("1000"));
    }

    #[test]
    fn test_delete_grace_promotion() {
        let cache = JobCache::new(0);
        let now = epoch_now();

        // grace of zero: a deleted running job expires immediately and the
        // next cleanup removes it
        insert_raw(&cache, "2000", test_job("2000.pbs", now, "01:00:00"), now + 3600, true);
        cache.delete("2000");
        {
            let jobs = cache.jobs.read().unwrap();
            assert!(jobs.get("2000").unwrap().expiration <= now + 1);
        }
    }
}
