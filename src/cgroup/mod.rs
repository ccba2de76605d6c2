//! cgroupfs access for PBS job cgroups. Statistics are read straight from
//! the cgroup filesystem, supporting both the v1 split hierarchies and the
//! v2 unified hierarchy.

pub mod stats;

use std::path::{Path, PathBuf};

use crate::error::{ExporterError, Result};

pub use stats::{read_stats, CgroupStats, CpuStats, HugetlbStats, IoStats, MemoryStats, TaskStats};

/// Slice that PBS places job cgroups under, per hierarchy version.
const PBS_CGROUP_PATH_V1: &str = "pbs_jobs.service/jobid";
const PBS_CGROUP_PATH_V2: &str = "pbs_jobs.service/jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

impl CgroupVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CgroupVersion::V1 => "v1",
            CgroupVersion::V2 => "v2",
        }
    }
}

/// The unified hierarchy exposes `cgroup.controllers` at its root.
pub fn detect_version(root: &Path) -> CgroupVersion {
    if root.join("cgroup.controllers").is_file() {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    }
}

pub fn pbs_jobs_path(version: CgroupVersion) -> &'static str {
    match version {
        CgroupVersion::V1 => PBS_CGROUP_PATH_V1,
        CgroupVersion::V2 => PBS_CGROUP_PATH_V2,
    }
}

/// On v1 the named hierarchies live one level below the root; job listing
/// and task reads go through cpu,cpuacct like PBS itself does.
fn v1_hierarchy(root: &Path, subsystem: &str) -> PathBuf {
    root.join(subsystem)
}

/// List the per-job cgroups directly below `path`, as paths relative to
/// the hierarchy root.
pub fn list_cgroups(root: &Path, version: CgroupVersion, path: &str) -> Result<Vec<String>> {
    let base = match version {
        CgroupVersion::V1 => v1_hierarchy(root, "cpu,cpuacct").join(path),
        CgroupVersion::V2 => root.join(path),
    };
    if !base.is_dir() {
        return Err(ExporterError::DirectoryMissing(base));
    }

    let mut cgroup_paths = Vec::new();
    for entry in std::fs::read_dir(&base)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            cgroup_paths.push(format!("{}/{}", path, entry.file_name().to_string_lossy()));
        }
    }

    Ok(cgroup_paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_version() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(detect_version(root.path()), CgroupVersion::V1);

        std::fs::write(root.path().join("cgroup.controllers"), "cpu memory pids").unwrap();
        assert_eq!(detect_version(root.path()), CgroupVersion::V2);
    }

    #[test]
    fn test_list_cgroups_v2() {
        let root = tempfile::tempdir().unwrap();
        let jobs = root.path().join("pbs_jobs.service/jobs");
        std::fs::create_dir_all(jobs.join("12345")).unwrap();
        std::fs::create_dir_all(jobs.join("12346.2")).unwrap();
        std::fs::write(jobs.join("cgroup.procs"), "").unwrap();

        let mut paths =
            list_cgroups(root.path(), CgroupVersion::V2, "pbs_jobs.service/jobs").unwrap();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "pbs_jobs.service/jobs/12345",
                "pbs_jobs.service/jobs/12346.2"
            ]
        );
    }

    #[test]
    fn test_list_cgroups_missing() {
        let root = tempfile::tempdir().unwrap();
        let err = list_cgroups(root.path(), CgroupVersion::V2, "pbs_jobs.service/jobs");
        assert!(matches!(err, Err(ExporterError::DirectoryMissing(_))));
    }
}
