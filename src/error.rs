//! Error taxonomy for reconciliation passes.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::Endpoint;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("container runtime query failed: {0}")]
    RuntimeQuery(String),

    #[error("registry read failed: {0}")]
    RegistryRead(String),

    #[error("registry write failed: {0}")]
    RegistryWrite(String),

    #[error("invalid vhost {0:?}")]
    InvalidVhost(String),

    #[error("reconciliation pass timed out after {0:?}")]
    Timeout(Duration),

    #[error("{} registry write(s) failed: {}", .0.len(), join_failures(.0))]
    PartialApply(Vec<WriteFailure>),
}

impl From<bollard::errors::Error> for SyncError {
    fn from(e: bollard::errors::Error) -> Self {
        SyncError::RuntimeQuery(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Add,
    Remove,
    EnsureVhost,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Add => f.write_str("add"),
            WriteOp::Remove => f.write_str("remove"),
            WriteOp::EnsureVhost => f.write_str("create"),
        }
    }
}

/// One key mutation that did not go through.  `endpoint` is `None` for
/// the vhost directory itself.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub vhost: String,
    pub op: WriteOp,
    pub endpoint: Option<Endpoint>,
    pub reason: String,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(
                f,
                "{} {} on {}: {}",
                self.op, endpoint, self.vhost, self.reason
            ),
            None => write!(f, "{} vhost {}: {}", self.op, self.vhost, self.reason),
        }
    }
}

fn join_failures(failures: &[WriteFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
