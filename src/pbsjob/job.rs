use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ExporterError, Result};
use crate::util;

static PBS_VNODE_REGEX: OnceLock<Regex> = OnceLock::new();
static UID_CACHE: OnceLock<HashMap<String, String>> = OnceLock::new();

fn pbs_vnode_regex() -> &'static Regex {
    PBS_VNODE_REGEX
        .get_or_init(|| Regex::new(r"[A-Za-z0-9_.-]+\[(\d+)\]").expect("valid vnode regex"))
}

/// Username to uid lookup from the passwd database, cached for the
/// process lifetime.
fn lookup_uid(username: &str) -> Option<String> {
    let cache = UID_CACHE.get_or_init(|| {
        let mut map = HashMap::new();
        if let Ok(content) = std::fs::read_to_string("/etc/passwd") {
            for line in content.lines() {
                let mut parts = line.split(':');
                if let (Some(name), _, Some(uid)) = (parts.next(), parts.next(), parts.next()) {
                    map.insert(name.to_string(), uid.to_string());
                }
            }
        }
        map
    });

    cache.get(username).cloned()
}

/// `resources_used.cpus` can be JSON ('{"host.domain": "1"}') or a comma
/// separated list ('1,2,3,4'); it is carried verbatim as a list of strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcesUsed {
    pub cpupercent: i64,
    pub cpus: Vec<String>,
    pub cput: String,
    pub mem: i64,
    pub ncpus: i64,
    pub ngpus: i64,
    pub vmem: i64,
    pub walltime: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceList {
    pub mem: i64,
    pub ncpus: i64,
    pub nfpgas: i64,
    pub ngpus: i64,
    pub place: String,
    pub walltime: String,
}

/// A PBS job as materialised from its on-disk `.JB` file. Attributes absent
/// from the file leave the field at its zero value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Job {
    pub job_name: String,
    pub job_owner: String,
    pub resources_used: ResourcesUsed,
    pub job_state: String,
    pub queue: String,
    pub server: String,
    pub checkpoint: String,
    pub error_path: String,
    pub exec_host: Vec<String>,
    pub exec_vnode: Vec<String>,
    pub interactive: i64,
    pub join_path: String,
    pub keep_files: String,
    pub mtime: i64,
    pub output_path: String,
    pub resource_list: ResourceList,
    pub sched_select: Vec<String>,
    pub stime: i64,
    pub session_id: String,
    pub shell_path_list: String,
    pub job_dir: String,
    pub substate: String,
    pub variable_list: Vec<String>,
    pub euser: String,
    pub egroup: String,
    pub hashname: String,
    pub cookie: String,
    pub umask: String,
    pub run_count: i64,
    pub job_kill_delay: String,
    pub executable: String,
    pub argument_list: String,
    pub project: String,
    pub run_version: String,
    pub submit_host: String,
    pub binding: Vec<String>,
}

impl Job {
    /// The job id is the hashname up to the first dot, e.g. "1000.pbs" -> "1000".
    pub fn job_id(&self) -> &str {
        self.hashname.split('.').next().unwrap_or("")
    }

    pub fn job_username(&self) -> &str {
        &self.euser
    }

    pub fn job_uid(&self) -> Result<String> {
        let username = self.job_username();
        if username.is_empty() {
            return Err(ExporterError::UserLookup("username is empty".to_string()));
        }

        lookup_uid(username).ok_or_else(|| {
            ExporterError::UserLookup(format!("no passwd entry for user '{username}'"))
        })
    }

    pub fn ngpus(&self) -> Result<i64> {
        // Resource_List.ngpus is introduced in PBS 2025
        if self.resource_list.ngpus != 0 {
            return Ok(self.resource_list.ngpus);
        }

        for select_item in &self.sched_select {
            if let Some(ngpus) = select_item.strip_prefix("ngpus=") {
                return ngpus.parse().map_err(|_| {
                    ExporterError::ValueParse(format!("invalid ngpus value '{ngpus}'"))
                });
            }
        }

        Ok(0)
    }

    pub fn requested_walltime(&self) -> i64 {
        util::parse_walltime(&self.resource_list.walltime)
    }

    /// Number of nodes requested; the leading chunk count of the select
    /// statement.
    pub fn node_select(&self) -> Result<i64> {
        let node_count = self.sched_select.first().map(String::as_str).unwrap_or("");

        node_count.parse().map_err(|_| {
            ExporterError::ValueParse(format!("invalid select node count '{node_count}'"))
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive > 0
    }

    /// The PBS Professional User's Guide indicates that "PBS assigns
    /// chunks to job processes in the order in which the chunks appear
    /// in the select statement. PBS takes the first chunk from the
    /// primary execution host; this is where the top task of the job
    /// runs." and "The job's primary execution host is the host that
    /// supplies the vnode to satisfy the first chunk requested by the job."
    pub fn is_primary_node(&self, hostname: &str) -> bool {
        self.exec_host
            .first()
            .map(|primary| primary.starts_with(hostname))
            .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.job_state == "R"
    }

    /// The bracketed vnode index of the primary exec vnode, or empty when
    /// the node has no vnodes.
    pub fn vnode(&self) -> String {
        let primary = self.exec_vnode.first().map(String::as_str).unwrap_or("");

        pbs_vnode_regex()
            .captures(primary)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id() {
        let mut job = Job::default();
        let tests = [
            ("", ""),
            ("12345", "12345"),
            ("12345.pbs", "12345"),
            ("4645392[1].aqua", "4645392[1]"),
        ];
        for (hashname, want) in tests {
            job.hashname = hashname.to_string();
            assert_eq!(job.job_id(), want);
        }
    }

    #[test]
    fn test_ngpus() {
        let mut job = Job::default();
        assert_eq!(job.ngpus().unwrap(), 0);

        job.sched_select = vec!["2".into(), "ncpus=8".into(), "ngpus=4".into()];
        assert_eq!(job.ngpus().unwrap(), 4);

        // the declared resource wins over the select statement
        job.resource_list.ngpus = 2;
        assert_eq!(job.ngpus().unwrap(), 2);

        job.resource_list.ngpus = 0;
        job.sched_select = vec!["1".into(), "ngpus=x".into()];
        assert!(job.ngpus().is_err());
    }

    #[test]
    fn test_node_select() {
        let mut job = Job::default();
        assert!(job.node_select().is_err());

        job.sched_select = vec!["3".into(), "ncpus=8".into()];
        assert_eq!(job.node_select().unwrap(), 3);
    }

    #[test]
    fn test_requested_walltime() {
        let mut job = Job::default();
        assert_eq!(job.requested_walltime(), 0);

        job.resource_list.walltime = "01:30:00".to_string();
        assert_eq!(job.requested_walltime(), 5400);
    }

    #[test]
    fn test_is_primary_node() {
        let mut job = Job::default();
        assert!(!job.is_primary_node("node1"));

        job.exec_host = vec!["node1/0*8".into(), "node2/0*8".into()];
        assert!(job.is_primary_node("node1"));
        assert!(!job.is_primary_node("node2"));
    }

    #[test]
    fn test_is_running() {
        let mut job = Job::default();
        assert!(!job.is_running());
        job.job_state = "R".to_string();
        assert!(job.is_running());
        job.job_state = "E".to_string();
        assert!(!job.is_running());
    }

    #[test]
    fn test_vnode() {
        let mut job = Job::default();
        assert_eq!(job.vnode(), "");

        job.exec_vnode = vec!["(node1[12]:ncpus=8)".into(), "(node2[3]:ncpus=8)".into()];
        assert_eq!(job.vnode(), "12");

        job.exec_vnode = vec!["(node1:ncpus=8)".into()];
        assert_eq!(job.vnode(), "");
    }

    #[test]
    fn test_is_interactive() {
        let mut job = Job::default();
        assert!(!job.is_interactive());
        job.interactive = 1;
        assert!(job.is_interactive());
    }

    #[test]
    fn test_job_uid_empty_username() {
        let job = Job::default();
        assert!(job.job_uid().is_err());
    }
}
