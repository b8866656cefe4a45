//! Fleet backend error types.

use std::time::Duration;

use thiserror::Error;

pub type FleetResult<T> = Result<T, FleetError>;

/// A single backend call failed.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    CallTimeout { command: String, timeout: Duration },

    #[error("unexpected backend output: {0}")]
    Parse(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("{op} failed: {reason}")]
    Rejected { op: &'static str, reason: String },
}
