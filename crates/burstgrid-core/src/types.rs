//! Domain types shared by the controller, the reconciler and the fleet
//! backends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a group member, as reported by the fleet backend.
pub type NodeId = String;

/// Lifecycle status of a group member.
///
/// A node exists in the group before it is ready: a growth call creates it
/// in `Provisioning`, polling observes it reach `Running`, and a wait that
/// expires marks it `Unreachable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Provisioning,
    Running,
    Unreachable,
    Terminated,
}

impl NodeStatus {
    /// Whether the node can accept a workload right now.
    pub fn is_running(self) -> bool {
        self == NodeStatus::Running
    }

    /// Whether the node will never become `Running` again.
    pub fn is_terminal(self) -> bool {
        self == NodeStatus::Terminated
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Provisioning => "provisioning",
            NodeStatus::Running => "running",
            NodeStatus::Unreachable => "unreachable",
            NodeStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// A group member as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub status: NodeStatus,
    /// Confirmed running the workload.
    pub carries_load: bool,
}
