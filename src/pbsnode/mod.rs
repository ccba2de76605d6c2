//! Node inventory from the `pbsnodes` CLI. The server answers with one
//! JSON document describing every vnode it knows about.

use std::collections::HashMap;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::error::{ExporterError, Result};
use crate::util;

static PBS_VNODE_REGEX: OnceLock<Regex> = OnceLock::new();

fn pbs_vnode_regex() -> &'static Regex {
    PBS_VNODE_REGEX
        .get_or_init(|| Regex::new(r"[A-Za-z0-9_.-]+\[(\d+)\]").expect("valid vnode regex"))
}

/// Node state flags as a bit field, in the order PBS documents them.
const NODE_STATES: [(&str, i64); 17] = [
    ("free", 1),
    ("busy", 2),
    ("job-busy", 4),
    ("job-exclusive", 8),
    ("resv-exclusive", 16),
    ("offline", 32),
    ("maintenance", 64),
    ("down", 128),
    ("provisioning", 256),
    ("stale", 512),
    ("state-unknown", 1024),
    ("unresolvable", 2048),
    ("wait-provisioning", 4096),
    ("sleep", 8192),
    ("powered-off", 16384),
    ("powering-down", 32768),
    ("powering-on", 65536),
];

const AVAILABLE_STATES: [&str; 5] = ["free", "busy", "job-busy", "job-exclusive", "resv-exclusive"];
const UNAVAILABLE_STATES: [&str; 8] = [
    "down",
    "maintenance",
    "offline",
    "provisioning",
    "stale",
    "state-unknown",
    "unresolvable",
    "wait-provisioning",
];

/// PBS reports memory either as a plain byte count, a human-readable
/// string like "512gb", or null.
fn de_human_bytes<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawBytes {
        Num(i64),
        Str(String),
    }

    match Option::<RawBytes>::deserialize(deserializer)? {
        None => Ok(0),
        Some(RawBytes::Num(num)) => Ok(num),
        Some(RawBytes::Str(s)) => util::parse_mem_bytes(&s).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Nodes {
    // pbsnodes returns `timestamp` as an int but occasionally as an empty
    // string, so it is not modelled at all.
    #[serde(default)]
    pub pbs_version: String,
    #[serde(default)]
    pub pbs_server: String,
    #[serde(default)]
    pub nodes: HashMap<String, Node>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Node {
    #[serde(default, rename = "Mom")]
    pub mom: String,
    #[serde(default, rename = "Port")]
    pub port: i64,
    #[serde(default)]
    pub pbs_version: String,
    #[serde(default)]
    pub ntype: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub pcpus: i64,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub resources_available: ResourcesAvailable,
    #[serde(default)]
    pub resources_assigned: ResourcesAssigned,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub resv_enable: String,
    #[serde(default)]
    pub sharing: String,
    #[serde(default)]
    pub in_multivnode_host: i64,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub last_state_change_time: i64,
    #[serde(default)]
    pub last_used_time: i64,
    #[serde(default)]
    pub server_instance_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourcesAvailable {
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub host: String,
    #[serde(default, deserialize_with = "de_human_bytes")]
    pub hpmem: i64,
    #[serde(default, deserialize_with = "de_human_bytes")]
    pub mem: i64,
    #[serde(default)]
    pub ncpus: i64,
    #[serde(default)]
    pub ngpus: i64,
    #[serde(default)]
    pub nfpgas: i64,
    #[serde(default)]
    pub qlist: String,
    #[serde(default, deserialize_with = "de_human_bytes")]
    pub vmem: i64,
    #[serde(default)]
    pub vnode: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourcesAssigned {
    #[serde(default, deserialize_with = "de_human_bytes")]
    pub hpmem: i64,
    #[serde(default, deserialize_with = "de_human_bytes")]
    pub mem: i64,
    #[serde(default)]
    pub ncpus: i64,
    #[serde(default)]
    pub ngpus: i64,
    #[serde(default, deserialize_with = "de_human_bytes")]
    pub vmem: i64,
}

impl Node {
    /// The bracketed vnode index of this node's vnode name, or empty.
    pub fn vnode(&self) -> String {
        pbs_vnode_regex()
            .captures(&self.resources_available.vnode)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }

    pub fn is_licensed(&self) -> bool {
        self.license == "l"
    }

    /// The comma-separated state string folded into a bit field.
    pub fn state_bits(&self) -> i64 {
        self.state
            .split(',')
            .map(|state| {
                NODE_STATES
                    .iter()
                    .find(|(name, _)| *name == state)
                    .map(|(_, bit)| *bit)
                    .unwrap_or(0)
            })
            .sum()
    }

    pub fn node_states(&self) -> Result<Vec<String>> {
        self.state
            .split(',')
            .map(|state| {
                let state = state.to_ascii_lowercase();
                if NODE_STATES.iter().any(|(name, _)| *name == state) {
                    Ok(state)
                } else {
                    Err(ExporterError::ValueParse(format!(
                        "unknown node state: {state}"
                    )))
                }
            })
            .collect()
    }

    pub fn is_available(&self) -> Result<bool> {
        let states = self.node_states()?;

        let available = states
            .iter()
            .any(|state| AVAILABLE_STATES.contains(&state.as_str()));
        let unavailable = states
            .iter()
            .any(|state| UNAVAILABLE_STATES.contains(&state.as_str()));

        Ok(available && !unavailable)
    }
}

pub fn parse_pbs_nodes(output: &[u8]) -> Result<Nodes> {
    Ok(serde_json::from_slice(output)?)
}

/// Query the PBS server for all vnodes. stderr output is treated as a
/// failure even when the exit status is zero.
pub fn get_pbs_nodes() -> Result<Nodes> {
    let output = Command::new("pbsnodes").args(["-av", "-F", "json"]).output()?;

    if !output.status.success() {
        return Err(ExporterError::Command(format!(
            "pbsnodes exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    if !output.stderr.is_empty() {
        return Err(ExporterError::Command(format!(
            "pbsnodes command stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    parse_pbs_nodes(&output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PBSNODES_JSON: &str = r#"{
        "timestamp": 1749249370,
        "pbs_version": "2024.1.1",
        "pbs_server": "pbs01",
        "nodes": {
            "node1[0]": {
                "Mom": "node1.example.com",
                "Port": 15002,
                "pbs_version": "2024.1.1",
                "ntype": "PBS",
                "state": "job-busy",
                "pcpus": 128,
                "jobs": ["1000.pbs/0"],
                "resources_available": {
                    "arch": "linux",
                    "host": "node1",
                    "mem": "512gb",
                    "ncpus": 128,
                    "ngpus": 4,
                    "qlist": "workq",
                    "vmem": 549755813888,
                    "vnode": "node1[0]"
                },
                "resources_assigned": {
                    "mem": "128gb",
                    "ncpus": 64,
                    "hpmem": null
                },
                "in_multivnode_host": 1,
                "license": "l",
                "partition": "compute"
            }
        }
    }"#;

    #[test]
    fn test_parse_pbs_nodes() {
        let nodes = parse_pbs_nodes(PBSNODES_JSON.as_bytes()).unwrap();

        assert_eq!(nodes.pbs_server, "pbs01");
        let node = &nodes.nodes["node1[0]"];
        assert_eq!(node.mom, "node1.example.com");
        assert_eq!(node.resources_available.mem, 512 << 30);
        assert_eq!(node.resources_available.vmem, 549_755_813_888);
        assert_eq!(node.resources_assigned.mem, 128 << 30);
        assert_eq!(node.resources_assigned.hpmem, 0);
        assert_eq!(node.in_multivnode_host, 1);
    }

    #[test]
    fn test_vnode() {
        let nodes = parse_pbs_nodes(PBSNODES_JSON.as_bytes()).unwrap();
        assert_eq!(nodes.nodes["node1[0]"].vnode(), "0");

        let node = Node::default();
        assert_eq!(node.vnode(), "");
    }

    #[test]
    fn test_is_licensed() {
        let nodes = parse_pbs_nodes(PBSNODES_JSON.as_bytes()).unwrap();
        assert!(nodes.nodes["node1[0]"].is_licensed());
        assert!(!Node::default().is_licensed());
    }

    #[test]
    fn test_state_bits() {
        let mut node = Node::default();

        node.state = "free".to_string();
        assert_eq!(node.state_bits(), 1);

        node.state = "offline,down".to_string();
        assert_eq!(node.state_bits(), 160);

        node.state = "unheard-of".to_string();
        assert_eq!(node.state_bits(), 0);
    }

    #[test]
    fn test_node_states() {
        let mut node = Node::default();

        node.state = "Free".to_string();
        assert_eq!(node.node_states().unwrap(), vec!["free"]);

        node.state = "job-busy,offline".to_string();
        assert_eq!(node.node_states().unwrap(), vec!["job-busy", "offline"]);

        node.state = "bogus".to_string();
        assert!(node.node_states().is_err());
    }

    #[test]
    fn test_is_available() {
        let mut node = Node::default();

        node.state = "free".to_string();
        assert!(node.is_available().unwrap());

        node.state = "job-busy,offline".to_string();
        assert!(!node.is_available().unwrap());

        node.state = "down".to_string();
        assert!(!node.is_available().unwrap());
    }
}
