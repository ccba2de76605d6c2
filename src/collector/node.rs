use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;

use crate::pbsnode;

use super::{gauge, new_desc, NODE_LABELS};

const INFO_LABELS: [&str; 4] = ["node", "vnode", "partition", "qlist"];

/// Cluster-wide vnode metrics from `pbsnodes`.
pub struct NodeCollector {
    descs: Vec<Desc>,
}

impl NodeCollector {
    pub fn new() -> Self {
        let descs = vec![
            new_desc(
                "pbs_node_hpmem_bytes",
                "Available huge page memory in bytes.",
                &NODE_LABELS,
            ),
            new_desc(
                "pbs_node_license_info",
                "Flag indicating if the node is licensed (1) or unlicensed (0).",
                &NODE_LABELS,
            ),
            new_desc("pbs_node_mem_bytes", "Available memory in bytes.", &NODE_LABELS),
            new_desc("pbs_node_ncpus", "Available CPU cores.", &NODE_LABELS),
            new_desc("pbs_node_nfpgas", "Available FPGAs.", &NODE_LABELS),
            new_desc("pbs_node_ngpus", "Available GPUs.", &NODE_LABELS),
            new_desc("pbs_node_info", "Node information.", &INFO_LABELS),
            new_desc(
                "pbs_node_state_available",
                "Node state availability; available (1) or unavailable (0).",
                &NODE_LABELS,
            ),
            new_desc("pbs_node_state_info", "Node state as bit field.", &NODE_LABELS),
        ];

        NodeCollector { descs }
    }
}

impl Default for NodeCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for NodeCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let node_info = match pbsnode::get_pbs_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::error!(error = %e, "Error collecting node info from pbsnodes");
                return Vec::new();
            }
        };

        let hpmem = gauge("pbs_node_hpmem_bytes", "Available huge page memory in bytes.", &NODE_LABELS);
        let license = gauge(
            "pbs_node_license_info",
            "Flag indicating if the node is licensed (1) or unlicensed (0).",
            &NODE_LABELS,
        );
        let mem = gauge("pbs_node_mem_bytes", "Available memory in bytes.", &NODE_LABELS);
        let ncpus = gauge("pbs_node_ncpus", "Available CPU cores.", &NODE_LABELS);
        let nfpgas = gauge("pbs_node_nfpgas", "Available FPGAs.", &NODE_LABELS);
        let ngpus = gauge("pbs_node_ngpus", "Available GPUs.", &NODE_LABELS);
        let info = gauge("pbs_node_info", "Node information.", &INFO_LABELS);
        let state_available = gauge(
            "pbs_node_state_available",
            "Node state availability; available (1) or unavailable (0).",
            &NODE_LABELS,
        );
        let state = gauge("pbs_node_state_info", "Node state as bit field.", &NODE_LABELS);

        for (host, node) in &node_info.nodes {
            // skip the natural node of a multi-vnode host
            if node.in_multivnode_host == 1 && *host == node.resources_available.host {
                continue;
            }

            // configuration error; skip
            let vnode = node.vnode();
            if vnode.is_empty() && node.in_multivnode_host == 1 {
                tracing::error!(host = %host, "Vnode is empty for multi-vnode node");
                continue;
            }

            // export metrics regardless of state validity
            let is_available = node.is_available().unwrap_or_else(|e| {
                tracing::warn!(host = %host, error = %e, "Error checking if node is available");
                false
            });

            let node_labels = [node.resources_available.host.as_str(), vnode.as_str()];

            hpmem
                .with_label_values(&node_labels)
                .set(node.resources_available.hpmem as f64);
            license
                .with_label_values(&node_labels)
                .set(node.is_licensed() as i64 as f64);
            mem.with_label_values(&node_labels)
                .set(node.resources_available.mem as f64);
            ncpus
                .with_label_values(&node_labels)
                .set(node.resources_available.ncpus as f64);
            nfpgas
                .with_label_values(&node_labels)
                .set(node.resources_available.nfpgas as f64);
            ngpus
                .with_label_values(&node_labels)
                .set(node.resources_available.ngpus as f64);
            info.with_label_values(&[
                &node.resources_available.host,
                &vnode,
                &node.partition,
                &node.resources_available.qlist,
            ])
            .set(1.0);
            state_available
                .with_label_values(&node_labels)
                .set(is_available as i64 as f64);
            state
                .with_label_values(&node_labels)
                .set(node.state_bits() as f64);
        }

        let mut families = Vec::new();
        families.extend(hpmem.collect());
        families.extend(license.collect());
        families.extend(mem.collect());
        families.extend(ncpus.collect());
        families.extend(nfpgas.collect());
        families.extend(ngpus.collect());
        families.extend(info.collect());
        families.extend(state_available.collect());
        families.extend(state.collect());
        families
    }
}
