//! Reconciliation error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use burstgrid_fleet::FleetError;
use burstgrid_state::{NodeId, StateError};

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// The bounded wait that expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// A grown node showing up in the group listing.
    NodeDetection,
    /// A node reporting `Running`.
    Readiness,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStage::NodeDetection => f.write_str("new node to appear"),
            WaitStage::Readiness => f.write_str("node to reach running"),
        }
    }
}

/// Why a reconciliation did not complete. All variants are recoverable at
/// the tick level.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("backend call failed: {0}")]
    Backend(#[from] FleetError),

    #[error("timed out after {waited:?} waiting for {stage}")]
    Timeout {
        stage: WaitStage,
        node: Option<NodeId>,
        waited: Duration,
    },

    #[error("node {node} terminated before reaching running")]
    NodeLost { node: NodeId },

    #[error("failed to start workload on {node}: {source}")]
    WorkloadStart {
        node: NodeId,
        #[source]
        source: FleetError,
    },

    #[error("no idle node in the group")]
    NoIdleNode,

    #[error(transparent)]
    State(#[from] StateError),
}

impl ReconcileError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReconcileError::Timeout { .. })
    }
}
