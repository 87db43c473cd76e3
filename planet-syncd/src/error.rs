use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single sync step. The orchestrator logs these and gives up
/// on the current cycle; none of them stop the loop.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("DNS lookup for {domain} failed: {source}")]
    Dns {
        domain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{url} answered with status {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{op} {} failed: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled by shutdown")]
    Cancelled,
}

impl SyncError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        SyncError::Transport {
            url: url.to_string(),
            source,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
