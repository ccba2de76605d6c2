//! Prometheus collectors. Each collector gathers its source on every
//! scrape and reports freshly-built metric families, so label sets always
//! mirror the current node state.

pub mod cgroup;
pub mod job;
pub mod node;

use std::collections::HashMap;
use std::sync::Arc;

use prometheus::core::Desc;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

use crate::config::CollectorConfig;
use crate::error::Result;
use crate::pbsjob::JobCache;

pub use cgroup::CgroupCollector;
pub use job::JobCollector;
pub use node::NodeCollector;

pub(crate) const JOB_LABELS: [&str; 2] = ["jobid", "runcount"];
pub(crate) const NODE_LABELS: [&str; 2] = ["node", "vnode"];

pub(crate) fn new_desc(name: &str, help: &str, labels: &[&str]) -> Desc {
    Desc::new(
        name.to_string(),
        help.to_string(),
        labels.iter().map(|label| label.to_string()).collect(),
        HashMap::new(),
    )
    .expect("valid metric description")
}

pub(crate) fn gauge(name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    GaugeVec::new(Opts::new(name, help), labels).expect("valid gauge options")
}

pub(crate) fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    CounterVec::new(Opts::new(name, help), labels).expect("valid counter options")
}

/// Register the enabled collectors on the registry. The job cache handle is
/// shared with the cgroup collector so orphaned cgroups can be filtered.
pub fn register_collectors(
    registry: &Registry,
    config: &CollectorConfig,
    job_cache: Option<Arc<JobCache>>,
) -> Result<()> {
    if config.enable_node_collector {
        registry.register(Box::new(NodeCollector::new()))?;
    } else {
        tracing::info!("PBS node collector is disabled");
    }

    if config.enable_job_collector {
        registry.register(Box::new(JobCollector::new(config, job_cache.clone())))?;
    } else {
        tracing::info!("PBS job collector is disabled");
    }

    if config.enable_cgroup_collector {
        registry.register(Box::new(CgroupCollector::new(config, job_cache)))?;
    } else {
        tracing::info!("Cgroup collector is disabled");
    }

    Ok(())
}
