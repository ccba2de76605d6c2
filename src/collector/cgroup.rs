use std::path::PathBuf;
use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec};

use crate::cgroup::{self, CgroupVersion};
use crate::config::CollectorConfig;
use crate::pbsjob::JobCache;
use crate::util;

use super::{counter, gauge, new_desc, JOB_LABELS};

const HUGETLB_LABELS: [&str; 3] = ["jobid", "runcount", "hugetlb_pagesize"];
const IO_LABELS: [&str; 3] = ["jobid", "runcount", "major"];

/// Per-job cgroup metrics read straight from the cgroup filesystem.
pub struct CgroupCollector {
    cgroup_path: String,
    cgroup_root: PathBuf,
    version: CgroupVersion,
    job_collector_enabled: bool,
    cache: Option<Arc<JobCache>>,
    descs: Vec<Desc>,
}

struct CgroupMetrics {
    cpu_count: GaugeVec,
    cpu_system: CounterVec,
    cpu_usage: CounterVec,
    cpu_user: CounterVec,
    hugetlb_max: GaugeVec,
    hugetlb_usage: GaugeVec,
    io_rbytes: GaugeVec,
    io_rios: GaugeVec,
    io_wbytes: GaugeVec,
    io_wios: GaugeVec,
    mem_active_anon: GaugeVec,
    mem_active_file: GaugeVec,
    mem_file_mapped: GaugeVec,
    mem_inactive_anon: GaugeVec,
    mem_inactive_file: GaugeVec,
    mem_limit: GaugeVec,
    mem_pgfault: CounterVec,
    mem_pgmajfault: CounterVec,
    mem_rss: GaugeVec,
    mem_shmem: GaugeVec,
    mem_swap_limit: GaugeVec,
    mem_swap_usage: GaugeVec,
    mem_usage: GaugeVec,
    mem_wss: GaugeVec,
    pid_limit: GaugeVec,
    pid_usage: GaugeVec,
    thread_usage: GaugeVec,
}

impl CgroupMetrics {
    fn new() -> Self {
        CgroupMetrics {
            cpu_count: gauge(
                "pbs_cgroup_cpus",
                "Number of CPUs allocated to the cgroup.",
                &JOB_LABELS,
            ),
            cpu_system: counter(
                "pbs_cgroup_cpu_system_seconds_total",
                "Total system CPU time in seconds consumed by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            cpu_usage: counter(
                "pbs_cgroup_cpu_usage_seconds_total",
                "Total CPU time in seconds consumed by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            cpu_user: counter(
                "pbs_cgroup_cpu_user_seconds_total",
                "Total user CPU time in seconds consumed by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            hugetlb_max: gauge(
                "pbs_cgroup_hugetlb_max_bytes",
                "Maximum huge page memory usage of tasks in the cgroup.",
                &HUGETLB_LABELS,
            ),
            hugetlb_usage: gauge(
                "pbs_cgroup_hugetlb_usage_bytes",
                "Current huge page memory usage of tasks in the cgroup.",
                &HUGETLB_LABELS,
            ),
            io_rbytes: gauge(
                "pbs_cgroup_io_rbytes_bytes",
                "Total bytes read by tasks in the cgroup.",
                &IO_LABELS,
            ),
            io_rios: gauge(
                "pbs_cgroup_io_rios_total",
                "Total read IO operations performed by tasks in the cgroup.",
                &IO_LABELS,
            ),
            io_wbytes: gauge(
                "pbs_cgroup_io_wbytes_bytes",
                "Total bytes written by tasks in the cgroup.",
                &IO_LABELS,
            ),
            io_wios: gauge(
                "pbs_cgroup_io_wios_total",
                "Total write IO operations performed by tasks in the cgroup.",
                &IO_LABELS,
            ),
            mem_active_anon: gauge(
                "pbs_cgroup_mem_active_anon_bytes",
                "Amount of anonymous and swap cache memory on the active LRU list.",
                &JOB_LABELS,
            ),
            mem_active_file: gauge(
                "pbs_cgroup_mem_active_file_bytes",
                "Amount of file-backed memory on the active LRU list.",
                &JOB_LABELS,
            ),
            mem_file_mapped: gauge(
                "pbs_cgroup_mem_file_mapped_bytes",
                "Amount of mapped file memory.",
                &JOB_LABELS,
            ),
            mem_inactive_anon: gauge(
                "pbs_cgroup_mem_inactive_anon_bytes",
                "Amount of anonymous and swap cache memory on the inactive LRU list.",
                &JOB_LABELS,
            ),
            mem_inactive_file: gauge(
                "pbs_cgroup_mem_inactive_file_bytes",
                "Amount of file-backed memory on the inactive LRU list.",
                &JOB_LABELS,
            ),
            mem_limit: gauge(
                "pbs_cgroup_mem_limit_bytes",
                "Memory usage limit for the cgroup.",
                &JOB_LABELS,
            ),
            mem_pgfault: counter(
                "pbs_cgroup_mem_pgfault_total",
                "Total number of page faults incurred (major and minor).",
                &JOB_LABELS,
            ),
            mem_pgmajfault: counter(
                "pbs_cgroup_mem_pgmajfault_total",
                "Total number of major page faults incurred.",
                &JOB_LABELS,
            ),
            mem_rss: gauge(
                "pbs_cgroup_mem_rss_bytes",
                "Resident Set Size (RSS): memory required to run tasks in the cgroup.",
                &JOB_LABELS,
            ),
            mem_shmem: gauge(
                "pbs_cgroup_mem_shmem_bytes",
                "Amount of swap-backed filesystem cache used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            mem_swap_limit: gauge(
                "pbs_cgroup_mem_swap_limit_bytes",
                "Swap memory usage limit for the cgroup.",
                &JOB_LABELS,
            ),
            mem_swap_usage: gauge(
                "pbs_cgroup_mem_swap_usage_bytes",
                "Total swap used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            mem_usage: gauge(
                "pbs_cgroup_mem_usage_bytes",
                "Total memory used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            mem_wss: gauge(
                "pbs_cgroup_mem_wss_bytes",
                "Working Set Size (WSS): active memory used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            pid_limit: gauge("pbs_cgroup_pid_limit", "PID limit of the cgroup.", &JOB_LABELS),
            pid_usage: gauge(
                "pbs_cgroup_pid_usage",
                "Number of PIDs used by the cgroup.",
                &JOB_LABELS,
            ),
            thread_usage: gauge(
                "pbs_cgroup_thread_usage",
                "Number of threads used by the cgroup.",
                &JOB_LABELS,
            ),
        }
    }

    fn families(self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.cpu_count.collect());
        families.extend(self.cpu_system.collect());
        families.extend(self.cpu_usage.collect());
        families.extend(self.cpu_user.collect());
        families.extend(self.hugetlb_max.collect());
        families.extend(self.hugetlb_usage.collect());
        families.extend(self.io_rbytes.collect());
        families.extend(self.io_rios.collect());
        families.extend(self.io_wbytes.collect());
        families.extend(self.io_wios.collect());
        families.extend(self.mem_active_anon.collect());
        families.extend(self.mem_active_file.collect());
        families.extend(self.mem_file_mapped.collect());
        families.extend(self.mem_inactive_anon.collect());
        families.extend(self.mem_inactive_file.collect());
        families.extend(self.mem_limit.collect());
        families.extend(self.mem_pgfault.collect());
        families.extend(self.mem_pgmajfault.collect());
        families.extend(self.mem_rss.collect());
        families.extend(self.mem_shmem.collect());
        families.extend(self.mem_swap_limit.collect());
        families.extend(self.mem_swap_usage.collect());
        families.extend(self.mem_usage.collect());
        families.extend(self.mem_wss.collect());
        families.extend(self.pid_limit.collect());
        families.extend(self.pid_usage.collect());
        families.extend(self.thread_usage.collect());
        families
    }
}

impl CgroupCollector {
    pub fn new(config: &CollectorConfig, cache: Option<Arc<JobCache>>) -> Self {
        let descs = vec![
            new_desc("pbs_cgroup_cpus", "Number of CPUs allocated to the cgroup.", &JOB_LABELS),
            new_desc(
                "pbs_cgroup_cpu_system_seconds_total",
                "Total system CPU time in seconds consumed by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_cpu_usage_seconds_total",
                "Total CPU time in seconds consumed by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_cpu_user_seconds_total",
                "Total user CPU time in seconds consumed by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_hugetlb_max_bytes",
                "Maximum huge page memory usage of tasks in the cgroup.",
                &HUGETLB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_hugetlb_usage_bytes",
                "Current huge page memory usage of tasks in the cgroup.",
                &HUGETLB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_io_rbytes_bytes",
                "Total bytes read by tasks in the cgroup.",
                &IO_LABELS,
            ),
            new_desc(
                "pbs_cgroup_io_rios_total",
                "Total read IO operations performed by tasks in the cgroup.",
                &IO_LABELS,
            ),
            new_desc(
                "pbs_cgroup_io_wbytes_bytes",
                "Total bytes written by tasks in the cgroup.",
                &IO_LABELS,
            ),
            new_desc(
                "pbs_cgroup_io_wios_total",
                "Total write IO operations performed by tasks in the cgroup.",
                &IO_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_active_anon_bytes",
                "Amount of anonymous and swap cache memory on the active LRU list.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_active_file_bytes",
                "Amount of file-backed memory on the active LRU list.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_file_mapped_bytes",
                "Amount of mapped file memory.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_inactive_anon_bytes",
                "Amount of anonymous and swap cache memory on the inactive LRU list.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_inactive_file_bytes",
                "Amount of file-backed memory on the inactive LRU list.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_limit_bytes",
                "Memory usage limit for the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_pgfault_total",
                "Total number of page faults incurred (major and minor).",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_pgmajfault_total",
                "Total number of major page faults incurred.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_rss_bytes",
                "Resident Set Size (RSS): memory required to run tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_shmem_bytes",
                "Amount of swap-backed filesystem cache used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_swap_limit_bytes",
                "Swap memory usage limit for the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_swap_usage_bytes",
                "Total swap used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_usage_bytes",
                "Total memory used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_mem_wss_bytes",
                "Working Set Size (WSS): active memory used by tasks in the cgroup.",
                &JOB_LABELS,
            ),
            new_desc("pbs_cgroup_pid_limit", "PID limit of the cgroup.", &JOB_LABELS),
            new_desc(
                "pbs_cgroup_pid_usage",
                "Number of PIDs used by the cgroup.",
                &JOB_LABELS,
            ),
            new_desc(
                "pbs_cgroup_thread_usage",
                "Number of threads used by the cgroup.",
                &JOB_LABELS,
            ),
        ];

        CgroupCollector {
            cgroup_path: config.cgroup_path.clone(),
            cgroup_root: config.cgroup_root.clone(),
            version: config.cgroup_version,
            job_collector_enabled: config.enable_job_collector,
            cache,
            descs,
        }
    }
}

impl Collector for CgroupCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let metrics = CgroupMetrics::new();

        let cgroup_paths =
            match cgroup::list_cgroups(&self.cgroup_root, self.version, &self.cgroup_path) {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::error!(error = %e, "Error listing cgroups");
                    return Vec::new();
                }
            };

        for cgroup_path in cgroup_paths {
            let stats = match cgroup::read_stats(&self.cgroup_root, self.version, &cgroup_path) {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!(cgroup_path, error = %e, "Error reading cgroup stats");
                    continue;
                }
            };

            // skip cgroups that do not belong to a job
            let job_id = util::cgroup_job_id(&stats.path);
            if job_id.is_empty() {
                tracing::error!(cgroup_path = %stats.path, "Job id empty");
                continue;
            }

            // skip when the job collector runs but has no job file for the
            // cgroup; the cgroup is orphaned or being torn down
            let mut runcount = String::new();
            if self.job_collector_enabled {
                let Some(cache) = &self.cache else {
                    tracing::error!("Job cache is uninitialised");
                    return Vec::new();
                };
                match cache.get(&job_id) {
                    Some(job) => runcount = job.run_count.to_string(),
                    None => {
                        tracing::error!(job_id = %job_id, "Job file not found");
                        continue;
                    }
                }
            }

            let job_labels = [job_id.as_str(), runcount.as_str()];

            metrics.cpu_count.with_label_values(&job_labels).set(stats.cpu.count as f64);
            metrics.cpu_system.with_label_values(&job_labels).inc_by(stats.cpu.system);
            metrics.cpu_usage.with_label_values(&job_labels).inc_by(stats.cpu.usage);
            metrics.cpu_user.with_label_values(&job_labels).inc_by(stats.cpu.user);
            metrics.mem_active_anon.with_label_values(&job_labels).set(stats.memory.active_anon);
            metrics.mem_active_file.with_label_values(&job_labels).set(stats.memory.active_file);
            metrics.mem_file_mapped.with_label_values(&job_labels).set(stats.memory.file_mapped);
            metrics
                .mem_inactive_anon
                .with_label_values(&job_labels)
                .set(stats.memory.inactive_anon);
            metrics
                .mem_inactive_file
                .with_label_values(&job_labels)
                .set(stats.memory.inactive_file);
            metrics.mem_limit.with_label_values(&job_labels).set(stats.memory.limit);
            metrics.mem_pgfault.with_label_values(&job_labels).inc_by(stats.memory.pgfault);
            metrics
                .mem_pgmajfault
                .with_label_values(&job_labels)
                .inc_by(stats.memory.pgmajfault);
            metrics.mem_rss.with_label_values(&job_labels).set(stats.memory.rss);
            metrics.mem_shmem.with_label_values(&job_labels).set(stats.memory.shmem);
            metrics.mem_swap_limit.with_label_values(&job_labels).set(stats.memory.swap_limit);
            metrics.mem_swap_usage.with_label_values(&job_labels).set(stats.memory.swap_usage);
            metrics.mem_usage.with_label_values(&job_labels).set(stats.memory.usage);
            metrics.mem_wss.with_label_values(&job_labels).set(stats.memory.wss);

            for io in &stats.io {
                let major = io.major.to_string();
                let io_labels = [job_id.as_str(), runcount.as_str(), major.as_str()];
                metrics.io_rbytes.with_label_values(&io_labels).set(io.rbytes);
                metrics.io_rios.with_label_values(&io_labels).set(io.rios);
                metrics.io_wbytes.with_label_values(&io_labels).set(io.wbytes);
                metrics.io_wios.with_label_values(&io_labels).set(io.wios);
            }

            metrics.pid_limit.with_label_values(&job_labels).set(stats.tasks.pid_limit);
            metrics.pid_usage.with_label_values(&job_labels).set(stats.tasks.pid_usage);
            metrics.thread_usage.with_label_values(&job_labels).set(stats.tasks.thread_usage);

            for hugetlb in &stats.hugetlb {
                let hugetlb_labels =
                    [job_id.as_str(), runcount.as_str(), hugetlb.pagesize.as_str()];
                metrics.hugetlb_max.with_label_values(&hugetlb_labels).set(hugetlb.max);
                metrics.hugetlb_usage.with_label_values(&hugetlb_labels).set(hugetlb.usage);
            }
        }

        metrics.families()
    }
}
