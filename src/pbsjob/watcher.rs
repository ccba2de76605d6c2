use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{ExporterError, Result};
use crate::util;

use super::cache::JobCache;
use super::codec;
use super::job::Job;

const JOB_FILE_SUFFIX: &str = ".JB";
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Single-level filesystem watcher over the PBS jobs directory. Events are
/// bridged from the notify thread into a tokio channel with a blocking
/// send, so bursts stall the producer instead of dropping events.
#[derive(Debug)]
pub struct JobWatcher {
    // keeps the notify backend alive for as long as the loop runs
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
}

impl JobWatcher {
    pub fn new(path: &Path) -> Result<Self> {
        if !util::directory_exists(path) {
            return Err(ExporterError::DirectoryMissing(path.to_path_buf()));
        }

        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.blocking_send(event);
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;

        Ok(JobWatcher {
            _watcher: watcher,
            events,
        })
    }

    /// Consume filesystem events forever, keeping the cache in sync with
    /// the job files on disk. Returns only when the event channel closes.
    pub async fn run(mut self, cache: Arc<JobCache>) -> Result<()> {
        while let Some(event) = self.events.recv().await {
            match event {
                Ok(event) => handle_event(&cache, &event).await,
                Err(e) => tracing::error!(error = %e, "Watch error"),
            }
        }

        Err(ExporterError::WatcherClosed)
    }
}

async fn handle_event(cache: &JobCache, event: &Event) {
    for path in &event.paths {
        if !is_job_file(path) {
            continue;
        }

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                tracing::debug!(path = %path.display(), kind = ?event.kind, "PBS job file modified");

                // every event triggers a full re-read, so coalesced writes
                // still converge on the final file contents
                match load_job_file(path).await {
                    Ok(job) => {
                        let job_id = job.job_id().to_string();
                        cache.set(&job_id, job);
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "Error reading job file");
                    }
                }
            }
            EventKind::Remove(_) => {
                tracing::debug!(path = %path.display(), "PBS job file removed");

                if let Some(job_id) = job_id_from_path(path) {
                    cache.delete(&job_id);
                }
            }
            _ => {}
        }
    }
}

/// List and decode every `.JB` file in the jobs directory, concurrently.
/// Files that fail to decode are logged and skipped; a missing directory
/// is fatal.
pub async fn scan_job_files(path: &Path) -> Result<Vec<Job>> {
    if !util::directory_exists(path) {
        return Err(ExporterError::DirectoryMissing(path.to_path_buf()));
    }

    let mut entries = tokio::fs::read_dir(path).await?;
    let mut tasks = JoinSet::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_job_file(&path) {
            continue;
        }

        tasks.spawn(async move {
            match load_job_file(&path).await {
                Ok(job) => Some(job),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Error parsing job file");
                    None
                }
            }
        });
    }

    let mut jobs = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Some(job)) = joined {
            jobs.push(job);
        }
    }

    Ok(jobs)
}

async fn load_job_file(path: &Path) -> Result<Job> {
    let content = tokio::fs::read(path).await?;
    codec::from_bytes(&content)
}

fn is_job_file(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .map(|name| name.ends_with(JOB_FILE_SUFFIX))
        .unwrap_or(false)
}

/// Job id of a removed file: the basename up to the first dot.
fn job_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(name.split('.').next().unwrap_or(name).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_job_file() {
        assert!(is_job_file(Path::new("/spool/jobs/1000.pbs.JB")));
        assert!(!is_job_file(Path::new("/spool/jobs/1000.pbs.TK")));
        assert!(!is_job_file(Path::new("/spool/jobs/1000.pbs.SC")));
        assert!(!is_job_file(Path::new("/spool/jobs")));
    }

    #[test]
    fn test_job_id_from_path() {
        assert_eq!(
            job_id_from_path(Path::new("/spool/jobs/1000.pbs.JB")).as_deref(),
            Some("1000")
        );
        assert_eq!(
            job_id_from_path(Path::new("4645392[1].aqua.JB")).as_deref(),
            Some("4645392[1]")
        );
    }

    #[test]
    fn test_watcher_missing_directory() {
        let err = JobWatcher::new(Path::new("/no/such/spool")).unwrap_err();
        assert!(matches!(err, ExporterError::DirectoryMissing(_)));
    }
}
