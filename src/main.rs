use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use prometheus::Registry;
use tracing_subscriber::EnvFilter;

use pbs_exporter::config::CollectorConfig;
use pbs_exporter::error::ExporterError;
use pbs_exporter::{collector, pbsjob, server, shutdown, util};

#[derive(Parser, Debug)]
#[command(name = "pbs-exporter")]
#[command(about = "Prometheus exporter for PBS compute nodes")]
#[command(version)]
struct Args {
    /// Enable the cgroup collector
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    cgroup_enabled: bool,

    /// Root path of the cgroup filesystem hierarchy
    #[arg(long, default_value = "/sys/fs/cgroup")]
    cgroup_root: PathBuf,

    /// Enable the job collector
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    job_enabled: bool,

    /// Enable the node collector
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    node_enabled: bool,

    /// PBS home directory
    #[arg(long, default_value = "/var/spool/pbs")]
    pbs_home: PathBuf,

    /// Address to listen on for web interface and telemetry
    #[arg(long, default_value = "0.0.0.0:9307")]
    listen_address: SocketAddr,

    /// Per-scrape timeout in seconds
    #[arg(long, default_value_t = 5)]
    scrape_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!("Starting PBS exporter");

    let hostname = util::hostname()?;
    let mut config = CollectorConfig::new(args.cgroup_root.clone(), hostname);
    config.pbs_home = args.pbs_home.clone();
    config.scrape_timeout = Duration::from_secs(args.scrape_timeout);
    config.enable_cgroup_collector = args.cgroup_enabled;
    config.enable_job_collector = args.job_enabled;
    config.enable_node_collector = args.node_enabled;

    tracing::info!(
        version = config.cgroup_version.as_str(),
        path = %config.cgroup_root.join(&config.cgroup_path).display(),
        "Using cgroup"
    );

    // required directories must exist before anything starts
    if args.cgroup_enabled && !util::directory_exists(&config.cgroup_root) {
        return Err(ExporterError::DirectoryMissing(config.cgroup_root.clone()).into());
    }
    if args.job_enabled && !util::directory_exists(&args.pbs_home) {
        return Err(ExporterError::DirectoryMissing(args.pbs_home.clone()).into());
    }

    let shutdown = shutdown::install_shutdown_handler();

    // scan the spool once, then keep the cache in sync from file events
    let mut job_cache = None;
    if args.job_enabled {
        let cache = pbsjob::initialise_job_cache(&args.pbs_home).await?;
        job_cache = Some(cache.clone());

        let pbs_home = args.pbs_home.clone();
        tokio::spawn(async move {
            if let Err(e) = pbsjob::watch_pbs_jobs(&pbs_home, cache).await {
                tracing::error!(error = %e, "Failed to watch PBS jobs");
            }
        });
    }

    let registry = Registry::new();
    collector::register_collectors(&registry, &config, job_cache)?;

    server::run_server(args.listen_address, registry, config.scrape_timeout, shutdown).await?;

    Ok(())
}
