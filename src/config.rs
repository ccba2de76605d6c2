use std::path::PathBuf;
use std::time::Duration;

use crate::cgroup::{self, CgroupVersion};

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub cgroup_path: String,
    pub cgroup_root: PathBuf,
    pub cgroup_version: CgroupVersion,
    pub hostname: String,
    pub pbs_home: PathBuf,
    pub scrape_timeout: Duration,

    pub enable_cgroup_collector: bool,
    pub enable_job_collector: bool,
    pub enable_node_collector: bool,
}

impl CollectorConfig {
    pub fn new(cgroup_root: PathBuf, hostname: String) -> Self {
        let cgroup_version = cgroup::detect_version(&cgroup_root);

        Self {
            cgroup_path: cgroup::pbs_jobs_path(cgroup_version).to_string(),
            cgroup_root,
            cgroup_version,
            hostname,
            pbs_home: PathBuf::from("/var/spool/pbs"),
            scrape_timeout: Duration::from_secs(5),
            enable_cgroup_collector: true,
            enable_job_collector: true,
            enable_node_collector: false,
        }
    }
}
