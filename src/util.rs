use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ExporterError, Result};

static PBS_JOB_ID_REGEX: OnceLock<Regex> = OnceLock::new();

fn pbs_job_id_regex() -> &'static Regex {
    PBS_JOB_ID_REGEX.get_or_init(|| {
        Regex::new(r"pbs_jobs\.service/(?:jobid|jobs)/(\d+(?:\[\d+\])?)(?:\.(\d+))?")
            .expect("valid PBS job id regex")
    })
}

/// Extract the PBS job id from a cgroup path.
///
/// Array tasks show up with a `.N` suffix on the cgroup name; PBS numbers
/// subjobs from 1 while the job id uses a zero-based `[N-1]` index. A `.1`
/// suffix is the primary subjob and carries no index.
pub fn cgroup_job_id(cgroup_path: &str) -> String {
    let Some(captures) = pbs_job_id_regex().captures(cgroup_path) else {
        return String::new();
    };

    let mut job_id = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    if let Some(index) = captures.get(2).and_then(|m| m.as_str().parse::<i64>().ok()) {
        if index > 1 {
            job_id = format!("{}[{}]", job_id, index - 1);
        }
    }

    job_id
}

/// Parse a PBS `HH:MM:SS` walltime into seconds. Empty input is 0.
pub fn parse_walltime(walltime: &str) -> i64 {
    if walltime.is_empty() {
        return 0;
    }

    let mut parts = walltime.splitn(3, ':');
    let mut next = || {
        parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .unwrap_or(0)
    };
    let hours = next();
    let minutes = next();
    let seconds = next();

    hours * 3600 + minutes * 60 + seconds
}

/// The List Format for cpus and mems is a comma-separated list of CPU
/// or memory-node numbers and ranges of numbers, in ASCII decimal.
pub fn parse_list_format(list_format: &str) -> Result<Vec<i64>> {
    let list_format = list_format.trim();
    if list_format.is_empty() {
        return Ok(Vec::new());
    }

    let mut result = Vec::new();
    for part in list_format.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start: i64 = start.trim().parse().map_err(|_| {
                ExporterError::ValueParse(format!("invalid list format range '{part}'"))
            })?;
            let end: i64 = end.trim().parse().map_err(|_| {
                ExporterError::ValueParse(format!("invalid list format range '{part}'"))
            })?;
            result.extend(start..=end);
        } else {
            let cpu: i64 = part.parse().map_err(|_| {
                ExporterError::ValueParse(format!("invalid list format entry '{part}'"))
            })?;
            result.push(cpu);
        }
    }

    Ok(result)
}

/// Parse a human-readable memory size ("64GiB", "1.5gb", "1024") into bytes.
/// All units are binary multiples, matching what PBS reports.
pub fn parse_mem_bytes(value: &str) -> Result<i64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| ExporterError::ValueParse(format!("invalid memory size '{value}'")))?;

    let shift = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        "t" | "tb" | "tib" => 40,
        "p" | "pb" | "pib" => 50,
        unit => {
            return Err(ExporterError::ValueParse(format!(
                "unknown memory unit '{unit}' in '{value}'"
            )))
        }
    };

    Ok((number * (1u64 << shift) as f64) as i64)
}

pub fn read_file_single_line(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().next().unwrap_or("").trim().to_string())
}

pub fn directory_exists(path: &Path) -> bool {
    path.is_dir()
}

pub fn hostname() -> Result<String> {
    let hostname = read_file_single_line(Path::new("/proc/sys/kernel/hostname"))?;
    if hostname.is_empty() {
        return Err(ExporterError::Command("hostname is empty".to_string()));
    }
    Ok(hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgroup_job_id() {
        let tests = [
            ("/sys/fs/cgroup/pbs_jobs.service/jobs/12345", "12345"),
            ("/sys/fs/cgroup/pbs_jobs.service/jobs/12345.2/child", "12345[1]"),
            ("/sys/fs/cgroup/pbs_jobs.service/jobs/12345.1", "12345"),
            ("/pbs_jobs.service/jobid/12345[1].pbs", "12345[1]"),
            ("/sys/fs/cgroup/system.slice/sshd.service", ""),
        ];
        for (path, want) in tests {
            assert_eq!(cgroup_job_id(path), want, "path {path}");
        }
    }

    #[test]
    fn test_parse_walltime() {
        assert_eq!(parse_walltime(""), 0);
        assert_eq!(parse_walltime("00:00:01"), 1);
        assert_eq!(parse_walltime("10:10:10"), 36610);
        assert_eq!(parse_walltime("100:00:00"), 360000);
    }

    #[test]
    fn test_parse_list_format() {
        assert_eq!(parse_list_format("").unwrap(), Vec::<i64>::new());
        assert_eq!(parse_list_format("3").unwrap(), vec![3]);
        assert_eq!(parse_list_format("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_list_format("0-2,7, 9-10").unwrap(), vec![0, 1, 2, 7, 9, 10]);
        assert!(parse_list_format("0-x").is_err());
    }

    #[test]
    fn test_parse_mem_bytes() {
        assert_eq!(parse_mem_bytes("1024").unwrap(), 1024);
        assert_eq!(parse_mem_bytes("1kb").unwrap(), 1024);
        assert_eq!(parse_mem_bytes("64GiB").unwrap(), 64 << 30);
        assert_eq!(parse_mem_bytes("1.5g").unwrap(), 3 << 29);
        assert_eq!(parse_mem_bytes("2tb").unwrap(), 2_i64 << 40);
        assert!(parse_mem_bytes("12xb").is_err());
        assert!(parse_mem_bytes("").is_err());
    }
}
