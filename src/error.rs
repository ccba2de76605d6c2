use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("framing error: {0}")]
    Framing(String),

    #[error("attribute '{name}', resource: '{resource}' unknown")]
    UnknownAttribute { name: String, resource: String },

    #[error("value parse error: {0}")]
    ValueParse(String),

    #[error("directory does not exist: {0}")]
    DirectoryMissing(PathBuf),

    #[error("job cache is uninitialised")]
    CacheUninitialised,

    #[error("cgroup uninitialised")]
    CgroupUninitialised,

    #[error("user lookup failed: {0}")]
    UserLookup(String),

    #[error("watcher event channel closed")]
    WatcherClosed,

    #[error("command failed: {0}")]
    Command(String),

    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
