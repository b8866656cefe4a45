//! The capability surface the reconciler needs from a fleet.

use std::collections::BTreeSet;

use async_trait::async_trait;

use burstgrid_core::{NodeId, NodeStatus};

use crate::error::FleetResult;

/// A managed group of worker nodes.
///
/// Calls may be slow (seconds) and may fail. There is no atomicity across
/// calls.
#[async_trait]
pub trait FleetBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Current members of the group.
    async fn list_nodes(&self) -> FleetResult<BTreeSet<NodeId>>;

    /// Ask the backend to bring the group to `desired` members.
    async fn resize(&self, desired: u32) -> FleetResult<()>;

    /// Lifecycle status of one member.
    async fn describe_status(&self, node: &str) -> FleetResult<NodeStatus>;

    /// Start the workload on a running member.
    async fn start_workload(&self, node: &str) -> FleetResult<()>;
}
