use std::collections::HashMap;
use std::path::Path;

use crate::error::{ExporterError, Result};
use crate::util;

use super::{v1_hierarchy, CgroupVersion};

/// A v1 memory limit at this value means the limit has not been written
/// yet; PBS sets real limits on job cgroups, so the cgroup is still being
/// initialised.
const MEMORY_LIMIT_UNINITIALISED: f64 = u64::MAX as f64;

#[derive(Debug, Default, Clone)]
pub struct CgroupStats {
    pub path: String,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub tasks: TaskStats,
    pub io: Vec<IoStats>,
    pub hugetlb: Vec<HugetlbStats>,
}

#[derive(Debug, Default, Clone)]
pub struct CpuStats {
    pub count: i64,
    /// Seconds of CPU time, split the way cpu.stat reports it.
    pub usage: f64,
    pub user: f64,
    pub system: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStats {
    pub usage: f64,
    pub limit: f64,
    pub rss: f64,
    /// Working set: usage minus easily reclaimable inactive file pages.
    pub wss: f64,
    pub file_mapped: f64,
    pub shmem: f64,
    pub active_anon: f64,
    pub inactive_anon: f64,
    pub active_file: f64,
    pub inactive_file: f64,
    pub swap_usage: f64,
    pub swap_limit: f64,
    pub pgfault: f64,
    pub pgmajfault: f64,
}

#[derive(Debug, Default, Clone)]
pub struct TaskStats {
    pub pid_limit: f64,
    pub pid_usage: f64,
    pub thread_usage: f64,
    pub pids: Vec<u64>,
}

#[derive(Debug, Default, Clone)]
pub struct IoStats {
    pub major: u64,
    pub rbytes: f64,
    pub wbytes: f64,
    pub rios: f64,
    pub wios: f64,
}

#[derive(Debug, Default, Clone)]
pub struct HugetlbStats {
    pub max: f64,
    pub pagesize: String,
    pub usage: f64,
}

pub fn read_stats(root: &Path, version: CgroupVersion, path: &str) -> Result<CgroupStats> {
    match version {
        CgroupVersion::V1 => read_stats_v1(root, path),
        CgroupVersion::V2 => read_stats_v2(root, path),
    }
}

fn read_stats_v2(root: &Path, path: &str) -> Result<CgroupStats> {
    let base = root.join(path);
    if !base.is_dir() {
        return Err(ExporterError::DirectoryMissing(base));
    }

    let mut stats = CgroupStats {
        path: path.to_string(),
        ..Default::default()
    };

    let cpu = read_kv_file(&base.join("cpu.stat"));
    stats.cpu.usage = cpu.get("usage_usec").copied().unwrap_or(0.0) / 1e6;
    stats.cpu.user = cpu.get("user_usec").copied().unwrap_or(0.0) / 1e6;
    stats.cpu.system = cpu.get("system_usec").copied().unwrap_or(0.0) / 1e6;
    stats.cpu.count = cpuset_count(&base.join("cpuset.cpus.effective"));

    stats.memory.usage = read_scalar_file(&base.join("memory.current")).unwrap_or(0.0);
    stats.memory.limit = read_scalar_file(&base.join("memory.max")).unwrap_or(0.0);

    let memory = read_kv_file(&base.join("memory.stat"));
    let stat = |key: &str| memory.get(key).copied().unwrap_or(0.0);
    stats.memory.rss = stat("anon") + stat("file_mapped");
    stats.memory.file_mapped = stat("file_mapped");
    stats.memory.shmem = stat("shmem");
    stats.memory.active_anon = stat("active_anon");
    stats.memory.inactive_anon = stat("inactive_anon");
    stats.memory.active_file = stat("active_file");
    stats.memory.inactive_file = stat("inactive_file");
    stats.memory.pgfault = stat("pgfault");
    stats.memory.pgmajfault = stat("pgmajfault");
    stats.memory.wss = (stats.memory.usage - stats.memory.inactive_file).max(0.0);

    stats.memory.swap_usage = read_scalar_file(&base.join("memory.swap.current")).unwrap_or(0.0);
    stats.memory.swap_limit = read_scalar_file(&base.join("memory.swap.max")).unwrap_or(0.0);

    stats.tasks.pid_limit = read_scalar_file(&base.join("pids.max")).unwrap_or(0.0);
    stats.tasks.pids = read_pid_file(&base.join("cgroup.procs"));
    stats.tasks.pid_usage = stats.tasks.pids.len() as f64;
    stats.tasks.thread_usage = read_pid_file(&base.join("cgroup.threads")).len() as f64;

    stats.io = read_io_stat_v2(&base.join("io.stat"));
    stats.hugetlb = read_hugetlb(&base, ".current", ".max");

    Ok(stats)
}

fn read_stats_v1(root: &Path, path: &str) -> Result<CgroupStats> {
    let cpuacct = v1_hierarchy(root, "cpu,cpuacct").join(path);
    if !cpuacct.is_dir() {
        return Err(ExporterError::DirectoryMissing(cpuacct));
    }

    let mut stats = CgroupStats {
        path: path.to_string(),
        ..Default::default()
    };

    // cpuacct.usage is nanoseconds; cpuacct.stat is USER_HZ ticks
    stats.cpu.usage = read_scalar_file(&cpuacct.join("cpuacct.usage")).unwrap_or(0.0) / 1e9;
    let cpu = read_kv_file(&cpuacct.join("cpuacct.stat"));
    stats.cpu.user = cpu.get("user").copied().unwrap_or(0.0) / 100.0;
    stats.cpu.system = cpu.get("system").copied().unwrap_or(0.0) / 100.0;
    stats.cpu.count = cpuset_count(&v1_hierarchy(root, "cpuset").join(path).join("cpuset.cpus"));

    let memory = v1_hierarchy(root, "memory").join(path);
    stats.memory.usage = read_scalar_file(&memory.join("memory.usage_in_bytes")).unwrap_or(0.0);
    stats.memory.limit =
        read_scalar_file(&memory.join("memory.limit_in_bytes")).unwrap_or(0.0);
    if stats.memory.limit >= MEMORY_LIMIT_UNINITIALISED {
        return Err(ExporterError::CgroupUninitialised);
    }

    let memory_stat = read_kv_file(&memory.join("memory.stat"));
    let stat = |key: &str| memory_stat.get(key).copied().unwrap_or(0.0);
    stats.memory.rss = stat("total_rss");
    // mapped file memory is not reported directly on v1; derive it
    stats.memory.file_mapped =
        (stat("total_rss") - stat("total_active_anon") - stat("total_inactive_anon")).max(0.0);
    // unavailable in cgroups v1
    stats.memory.shmem = 0.0;
    stats.memory.active_anon = stat("total_active_anon");
    stats.memory.inactive_anon = stat("total_inactive_anon");
    stats.memory.active_file = stat("total_active_file");
    stats.memory.inactive_file = stat("total_inactive_file");
    stats.memory.pgfault = stat("total_pgfault");
    stats.memory.pgmajfault = stat("total_pgmajfault");
    stats.memory.wss = (stats.memory.usage - stats.memory.inactive_file).max(0.0);

    // memsw counters include memory; report the swap-only share
    let memsw_usage = read_scalar_file(&memory.join("memory.memsw.usage_in_bytes")).unwrap_or(0.0);
    let memsw_limit = read_scalar_file(&memory.join("memory.memsw.limit_in_bytes")).unwrap_or(0.0);
    stats.memory.swap_usage = (memsw_usage - stats.memory.usage).max(0.0);
    stats.memory.swap_limit = (memsw_limit - stats.memory.limit).max(0.0);

    let pids = v1_hierarchy(root, "pids").join(path);
    stats.tasks.pid_limit = read_scalar_file(&pids.join("pids.max")).unwrap_or(0.0);
    stats.tasks.pids = read_pid_file(&cpuacct.join("cgroup.procs"));
    stats.tasks.pid_usage = stats.tasks.pids.len() as f64;
    stats.tasks.thread_usage = read_pid_file(&cpuacct.join("tasks")).len() as f64;

    let blkio = v1_hierarchy(root, "blkio").join(path);
    stats.io = read_io_stat_v1(
        &blkio.join("blkio.throttle.io_service_bytes_recursive"),
        &blkio.join("blkio.throttle.io_serviced_recursive"),
    );

    stats.hugetlb = read_hugetlb(
        &v1_hierarchy(root, "hugetlb").join(path),
        ".usage_in_bytes",
        ".max_usage_in_bytes",
    );

    Ok(stats)
}

/// Parse "key value" lines, e.g. cpu.stat or memory.stat.
fn read_kv_file(path: &Path) -> HashMap<String, f64> {
    let mut values = HashMap::new();

    if let Ok(content) = std::fs::read_to_string(path) {
        for line in content.lines() {
            if let Some((key, value)) = line.split_once(' ') {
                if let Ok(value) = value.trim().parse() {
                    values.insert(key.to_string(), value);
                }
            }
        }
    }

    values
}

/// Single numeric value; "max" reads as the kernel's no-limit sentinel.
fn read_scalar_file(path: &Path) -> Option<f64> {
    let content = std::fs::read_to_string(path).ok()?;
    let content = content.trim();
    if content == "max" {
        return Some(u64::MAX as f64);
    }

    content.parse().ok()
}

fn read_pid_file(path: &Path) -> Vec<u64> {
    std::fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .filter_map(|line| line.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Per-pagesize hugetlb accounting. Page sizes are discovered from the
/// `hugetlb.<size>.*` files present in the cgroup directory.
fn read_hugetlb(dir: &Path, usage_suffix: &str, max_suffix: &str) -> Vec<HugetlbStats> {
    let mut pagesizes = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // a page size token never contains a dot; this also keeps
            // "hugetlb.<size>.max_usage_in_bytes" from matching the
            // ".usage_in_bytes" suffix on v1
            if let Some(size) = name
                .strip_prefix("hugetlb.")
                .and_then(|rest| rest.strip_suffix(usage_suffix))
            {
                if !size.contains('.') {
                    pagesizes.push(size.to_string());
                }
            }
        }
    }
    pagesizes.sort();

    pagesizes
        .into_iter()
        .map(|pagesize| HugetlbStats {
            max: read_scalar_file(&dir.join(format!("hugetlb.{pagesize}{max_suffix}")))
                .unwrap_or(0.0),
            usage: read_scalar_file(&dir.join(format!("hugetlb.{pagesize}{usage_suffix}")))
                .unwrap_or(0.0),
            pagesize,
        })
        .collect()
}

fn cpuset_count(path: &Path) -> i64 {
    util::read_file_single_line(path)
        .ok()
        .and_then(|list| util::parse_list_format(&list).ok())
        .map(|cpus| cpus.len() as i64)
        .unwrap_or(0)
}

/// io.stat lines look like "253:0 rbytes=1024 wbytes=0 rios=12 wios=0 ...".
fn read_io_stat_v2(path: &Path) -> Vec<IoStats> {
    let mut devices: HashMap<u64, IoStats> = HashMap::new();

    if let Ok(content) = std::fs::read_to_string(path) {
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let Some(major) = parts
                .next()
                .and_then(|dev| dev.split(':').next())
                .and_then(|major| major.parse::<u64>().ok())
            else {
                continue;
            };

            let entry = devices.entry(major).or_insert_with(|| IoStats {
                major,
                ..Default::default()
            });
            for part in parts {
                let Some((key, value)) = part.split_once('=') else {
                    continue;
                };
                let value: f64 = value.parse().unwrap_or(0.0);
                match key {
                    "rbytes" => entry.rbytes += value,
                    "wbytes" => entry.wbytes += value,
                    "rios" => entry.rios += value,
                    "wios" => entry.wios += value,
                    _ => {}
                }
            }
        }
    }

    devices.into_values().collect()
}

/// v1 blkio files carry "MAJ:MIN Read|Write VALUE" lines, bytes and
/// operation counts in separate files.
fn read_io_stat_v1(bytes_path: &Path, serviced_path: &Path) -> Vec<IoStats> {
    let mut devices: HashMap<u64, IoStats> = HashMap::new();

    let mut merge = |path: &Path, read_op: fn(&mut IoStats, f64), write_op: fn(&mut IoStats, f64)| {
        if let Ok(content) = std::fs::read_to_string(path) {
            for line in content.lines() {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let [device, operation, value] = fields.as_slice() else {
                    continue;
                };
                let Some(major) = device
                    .split(':')
                    .next()
                    .and_then(|major| major.parse::<u64>().ok())
                else {
                    continue;
                };
                let value: f64 = value.parse().unwrap_or(0.0);

                let entry = devices.entry(major).or_insert_with(|| IoStats {
                    major,
                    ..Default::default()
                });
                match *operation {
                    "Read" => read_op(entry, value),
                    "Write" => write_op(entry, value),
                    _ => {}
                }
            }
        }
    };

    merge(bytes_path, |io, v| io.rbytes += v, |io, v| io.wbytes += v);
    merge(serviced_path, |io, v| io.rios += v, |io, v| io.wios += v);

    devices.into_values().collect()
}
