use std::path::PathBuf;

use worldview_protocol::ProtocolError;
use worldview_sched::SchedError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("scheduler error: {0}")]
    Sched(#[from] SchedError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
