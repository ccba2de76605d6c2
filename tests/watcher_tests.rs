use std::path::Path;
use std::time::Duration;

use pbs_exporter::error::ExporterError;
use pbs_exporter::pbsjob::cache::JobCache;
use pbs_exporter::pbsjob::job::Job;
use pbs_exporter::pbsjob::watcher::scan_job_files;
use pbs_exporter::pbsjob::{self, codec};

fn test_job(hashname: &str, job_name: &str) -> Job {
    let mut job = Job::default();
    job.hashname = hashname.to_string();
    job.job_name = job_name.to_string();
    job.job_state = "R".to_string();
    job.stime = chrono::Utc::now().timestamp();
    job.resource_list.walltime = "01:00:00".to_string();
    job
}

fn write_job_file(dir: &Path, job: &Job) {
    let encoded = codec::to_bytes(job).unwrap();
    std::fs::write(dir.join(format!("{}.JB", job.hashname)), encoded).unwrap();
}

/// Poll until the predicate holds or the deadline passes.
async fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_scan_job_files() {
    let dir = tempfile::tempdir().unwrap();

    write_job_file(dir.path(), &test_job("1000.pbs", "first"));
    write_job_file(dir.path(), &test_job("1001.pbs", "second"));
    // sibling artefacts and corrupt files are skipped
    std::fs::write(dir.path().join("1000.pbs.TK"), b"not a job").unwrap();
    std::fs::write(dir.path().join("9999.pbs.JB"), b"truncated").unwrap();

    let mut jobs = scan_job_files(dir.path()).await.unwrap();
    jobs.sort_by(|a, b| a.hashname.cmp(&b.hashname));

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].job_id(), "1000");
    assert_eq!(jobs[1].job_id(), "1001");
}

#[tokio::test]
async fn test_scan_missing_directory() {
    let err = scan_job_files(Path::new("/no/such/spool")).await;
    assert!(matches!(err, Err(ExporterError::DirectoryMissing(_))));
}

#[tokio::test]
async fn test_initialise_job_cache() {
    let pbs_home = tempfile::tempdir().unwrap();
    let jobs_dir = pbs_home.path().join("mom_priv/jobs");
    std::fs::create_dir_all(&jobs_dir).unwrap();

    write_job_file(&jobs_dir, &test_job("1000.pbs", "scanned"));

    let cache = pbsjob::initialise_job_cache(pbs_home.path()).await.unwrap();
    let job = cache.get("1000").expect("scanned job should be cached");
    assert_eq!(job.job_name, "scanned");
}

#[tokio::test]
async fn test_initialise_job_cache_missing_directory() {
    let pbs_home = tempfile::tempdir().unwrap();
    let err = pbsjob::initialise_job_cache(pbs_home.path()).await;
    assert!(matches!(err, Err(ExporterError::DirectoryMissing(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watcher_create_write_remove() {
    let pbs_home = tempfile::tempdir().unwrap();
    let jobs_dir = pbs_home.path().join("mom_priv/jobs");
    std::fs::create_dir_all(&jobs_dir).unwrap();

    let cache = JobCache::new(60);
    {
        let cache = cache.clone();
        let pbs_home = pbs_home.path().to_path_buf();
        tokio::spawn(async move {
            let _ = pbsjob::watch_pbs_jobs(&pbs_home, cache).await;
        });
    }
    // give the watcher a moment to arm before producing events
    tokio::time::sleep(Duration::from_millis(200)).await;

    // create
    write_job_file(&jobs_dir, &test_job("1000.pbs", "created"));
    assert!(wait_for(|| cache.get("1000").is_some()).await, "create event missed");

    // repeated writes converge on the final contents
    write_job_file(&jobs_dir, &test_job("1000.pbs", "rewritten"));
    write_job_file(&jobs_dir, &test_job("1000.pbs", "final"));
    assert!(
        wait_for(|| cache.get("1000").map(|j| j.job_name == "final").unwrap_or(false)).await,
        "write events missed"
    );

    // non-job files are ignored
    std::fs::write(jobs_dir.join("1000.pbs.TK"), b"checkpoint").unwrap();

    // remove flips the job out of the running set but keeps it through
    // the grace window
    std::fs::remove_file(jobs_dir.join("1000.pbs.JB")).unwrap();
    assert!(wait_for(|| !cache.is_running("1000")).await, "remove event missed");
    assert!(cache.get("1000").is_some(), "deleted job stays visible through grace");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watcher_ignores_corrupt_files() {
    let pbs_home = tempfile::tempdir().unwrap();
    let jobs_dir = pbs_home.path().join("mom_priv/jobs");
    std::fs::create_dir_all(&jobs_dir).unwrap();

    let cache = JobCache::new(60);
    {
        let cache = cache.clone();
        let pbs_home = pbs_home.path().to_path_buf();
        tokio::spawn(async move {
            let _ = pbsjob::watch_pbs_jobs(&pbs_home, cache).await;
        });
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    std::fs::write(jobs_dir.join("6666.pbs.JB"), b"garbage").unwrap();
    write_job_file(&jobs_dir, &test_job("7777.pbs", "intact"));

    assert!(wait_for(|| cache.get("7777").is_some()).await);
    assert!(cache.get("6666").is_none(), "corrupt job file must not be cached");
}
