use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;

use crate::config::CollectorConfig;
use crate::pbsjob::JobCache;

use super::{counter, gauge, new_desc, JOB_LABELS};

const INFO_LABELS: [&str; 11] = [
    "jobid",
    "runcount",
    "interactive",
    "name",
    "node",
    "project",
    "queue",
    "state",
    "uid",
    "username",
    "vnode",
];
const REQUESTS_LABELS: [&str; 8] = [
    "jobid", "runcount", "mem", "ncpus", "nfpgas", "ngpus", "place", "walltime",
];

/// Per-job metrics from the live job cache. Only the primary execution
/// host of a job exports its metrics.
pub struct JobCollector {
    cache: Option<Arc<JobCache>>,
    hostname: String,
    descs: Vec<Desc>,
}

impl JobCollector {
    pub fn new(config: &CollectorConfig, cache: Option<Arc<JobCache>>) -> Self {
        let descs = vec![
            new_desc("pbs_job_info", "Job information.", &INFO_LABELS),
            new_desc("pbs_job_interactive", "Job interactive flag.", &JOB_LABELS),
            new_desc(
                "pbs_job_requested_memory",
                "Requested memory for the job.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_requested_ncpus",
                "Requested ncpus for the job.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_requested_nfpgas",
                "Requested nfpgas for the job.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_requested_ngpus",
                "Requested ngpus for the job.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_requested_nodes",
                "Requested nodes for the job.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_requested_walltime",
                "Requested walltime for the job.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_requests_info",
                "Job requests information.",
                &REQUESTS_LABELS,
            ),
            new_desc(
                "pbs_job_run_count_total",
                "Number of times the job has been executed.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_start_time",
                "Start time of job as Unix timestamp (seconds since epoch).",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_job_end_time",
                "End time of job as Unix timestamp (seconds since epoch).",
                &JOB_LABELS,
            ),
        ];

        JobCollector {
            cache,
            hostname: config.hostname.clone(),
            descs,
        }
    }
}

impl Collector for JobCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Some(cache) = &self.cache else {
            tracing::error!("Job cache is uninitialised");
            return Vec::new();
        };

        let info = gauge("pbs_job_info", "Job information.", &INFO_LABELS);
        let interactive = gauge("pbs_job_interactive", "Job interactive flag.", &JOB_LABELS);
        let requested_memory = gauge(
            "pbs_job_requested_memory",
            "Requested memory for the job.",
            &JOB_LABELS,
        );
        let requested_ncpus = gauge(
            "pbs_job_requested_ncpus",
            "Requested ncpus for the job.",
            &JOB_LABELS,
        );
        let requested_nfpgas = gauge(
            "pbs_job_requested_nfpgas",
            "Requested nfpgas for the job.",
            &JOB_LABELS,
        );
        let requested_ngpus = gauge(
            "pbs_job_requested_ngpus",
            "Requested ngpus for the job.",
            &JOB_LABELS,
        );
        let requested_nodes = gauge(
            "pbs_job_requested_nodes",
            "Requested nodes for the job.",
            &JOB_LABELS,
        );
        let requested_walltime = gauge(
            "pbs_job_requested_walltime",
            "Requested walltime for the job.",
            &JOB_LABELS,
        );
        let requests = gauge(
            "pbs_job_requests_info",
            "Job requests information.",
            &REQUESTS_LABELS,
        );
        let run_count = counter(
            "pbs_job_run_count_total",
            "Number of times the job has been executed.",
            &JOB_LABELS,
        );
        let start_time = gauge(
            "pbs_job_start_time",
            "Start time of job as Unix timestamp (seconds since epoch).",
            &JOB_LABELS,
        );
        let end_time = gauge(
            "pbs_job_end_time",
            "End time of job as Unix timestamp (seconds since epoch).",
            &JOB_LABELS,
        );

        for job in cache.list() {
            // export from the primary node only
            if !job.is_primary_node(&self.hostname) {
                continue;
            }

            let job_id = job.job_id().to_string();
            let runcount = job.run_count.to_string();

            // export metrics regardless of user id, ngpus, and node select
            let job_uid = job.job_uid().unwrap_or_else(|e| {
                tracing::warn!(job_id = %job_id, error = %e, "Error getting job user id");
                String::new()
            });
            let ngpus = job.ngpus().unwrap_or_else(|e| {
                tracing::warn!(job_id = %job_id, error = %e, "Error getting job ngpus");
                0
            });
            let node_select = job.node_select().unwrap_or_else(|e| {
                tracing::warn!(job_id = %job_id, error = %e, "Error getting job node select");
                0
            });

            let job_labels = [job_id.as_str(), runcount.as_str()];
            let interactive_value = job.is_interactive();

            info.with_label_values(&[
                &job_id,
                &runcount,
                if interactive_value { "true" } else { "false" },
                &job.job_name,
                &self.hostname,
                &job.project,
                &job.queue,
                &job.job_state,
                &job_uid,
                job.job_username(),
                &job.vnode(),
            ])
            .set(1.0);
            interactive
                .with_label_values(&job_labels)
                .set(interactive_value as i64 as f64);
            requested_memory
                .with_label_values(&job_labels)
                .set(job.resource_list.mem as f64);
            requested_ncpus
                .with_label_values(&job_labels)
                .set(job.resource_list.ncpus as f64);
            requested_nfpgas
                .with_label_values(&job_labels)
                .set(job.resource_list.nfpgas as f64);
            requested_ngpus
                .with_label_values(&job_labels)
                .set(ngpus as f64);
            requested_nodes
                .with_label_values(&job_labels)
                .set(node_select as f64);
            requested_walltime
                .with_label_values(&job_labels)
                .set(job.requested_walltime() as f64);
            requests
                .with_label_values(&[
                    &job_id,
                    &runcount,
                    &job.resource_list.mem.to_string(),
                    &job.resource_list.ncpus.to_string(),
                    &job.resource_list.nfpgas.to_string(),
                    &ngpus.to_string(),
                    &job.resource_list.place,
                    &job.resource_list.walltime,
                ])
                .set(1.0);
            run_count
                .with_label_values(&job_labels)
                .inc_by(job.run_count as f64);
            start_time.with_label_values(&job_labels).set(job.stime as f64);
            if !job.is_running() {
                end_time.with_label_values(&job_labels).set(job.mtime as f64);
            }
        }

        let mut families = Vec::new();
        families.extend(info.collect());
        families.extend(interactive.collect());
        families.extend(requested_memory.collect());
        families.extend(requested_ncpus.collect());
        families.extend(requested_nfpgas.collect());
        families.extend(requested_ngpus.collect());
        families.extend(requested_nodes.collect());
        families.extend(requested_walltime.collect());
        families.extend(requests.collect());
        families.extend(run_count.collect());
        families.extend(start_time.collect());
        families.extend(end_time.collect());
        families
    }
}
