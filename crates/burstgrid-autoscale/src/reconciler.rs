//! Reconciler — turns a scaling decision into fleet calls.
//!
//! Each operation borrows the controller's state for its duration and
//! commits to it only after the backend confirmed the effect. Polling
//! tolerates failed or stale responses by polling again until the
//! deadline.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use burstgrid_fleet::FleetBackend;
use burstgrid_state::{ControllerState, GroupBounds, NodeId, NodeStatus, StateError};

use crate::error::{ReconcileError, ReconcileResult, WaitStage};
use crate::poll::{PollPolicy, PollWindow};

pub struct Reconciler {
    backend: Arc<dyn FleetBackend>,
    poll: PollPolicy,
    bounds: GroupBounds,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("backend", &self.backend.name())
            .field("poll", &self.poll)
            .field("bounds", &self.bounds)
            .finish()
    }
}

impl Reconciler {
    pub fn new(backend: Arc<dyn FleetBackend>, poll: PollPolicy, bounds: GroupBounds) -> Self {
        Self {
            backend,
            poll,
            bounds,
        }
    }

    /// Line the state up with the group as currently listed.
    ///
    /// Fails if the listing fails or the group is outside the configured
    /// bounds.
    pub async fn sync_group(&self, state: &mut ControllerState) -> ReconcileResult<u32> {
        self.members(state).await?;
        let size = state.desired_group_size();
        if !self.bounds.contains(size) {
            return Err(StateError::OutOfBounds {
                size,
                min: self.bounds.min_nodes,
                max: self.bounds.max_nodes,
            }
            .into());
        }
        Ok(size)
    }

    /// Add one node to the group and start the workload on it.
    ///
    /// On any failure after the resize was accepted, the group is resized
    /// back to its original size and the state is left untouched.
    pub async fn grow_by_one(&self, state: &mut ControllerState) -> ReconcileResult<NodeId> {
        self.check_growth(state.desired_group_size())?;
        let before = self.members(state).await?;
        let original = state.desired_group_size();
        self.check_growth(original)?;

        let target = original + 1;
        info!(from = original, to = target, "growing group");
        self.backend.resize(target).await?;

        match self.provision(state, &before).await {
            Ok(node) => {
                info!(node = %node, size = target, "group grew; node carries load");
                Ok(node)
            }
            Err(e) => {
                warn!(error = %e, size = original, "growth failed; reverting resize");
                self.revert(original).await;
                Err(e)
            }
        }
    }

    /// Start the workload on an existing member that is not carrying load.
    ///
    /// Never changes the group size. A node that fails to come up stays in
    /// the group as idle.
    pub async fn offload_to_idle_node(
        &self,
        state: &mut ControllerState,
    ) -> ReconcileResult<NodeId> {
        let members = self.members(state).await?;
        if !state.has_idle_capacity() {
            return Err(ReconcileError::NoIdleNode);
        }
        let Some(node) = state.idle_members(&members).into_iter().next() else {
            return Err(ReconcileError::NoIdleNode);
        };

        info!(node = %node, "offloading onto idle node");
        self.wait_until_running(state, &node).await?;
        self.start_workload(&node).await?;
        state.commit_offload(&node)?;
        info!(node = %node, active = state.active_len(), "offload complete");
        Ok(node)
    }

    /// Remove one member from the group and drop `node` from the active
    /// set. State changes only if the resize succeeds.
    pub async fn shrink_by_one(
        &self,
        state: &mut ControllerState,
        node: &str,
    ) -> ReconcileResult<()> {
        if !state.is_active(node) {
            return Err(StateError::InvariantViolation(format!(
                "shrink target {node} is not active"
            ))
            .into());
        }
        self.check_shrink(state.desired_group_size())?;
        self.members(state).await?;
        if !state.is_active(node) {
            return Err(StateError::InvariantViolation(format!(
                "shrink target {node} left the group"
            ))
            .into());
        }
        let original = state.desired_group_size();
        self.check_shrink(original)?;

        let target = original - 1;
        info!(node = %node, from = original, to = target, "shrinking group");
        self.backend.resize(target).await?;
        state.commit_shrink(node)?;
        Ok(())
    }

    /// List members, drop active nodes that have left the group and adopt
    /// the listed group size.
    async fn members(&self, state: &mut ControllerState) -> ReconcileResult<BTreeSet<NodeId>> {
        let members = self.backend.list_nodes().await?;
        if let Err(e) = state.check_invariants(&members, self.bounds)
            && matches!(e, StateError::InvariantViolation(_))
        {
            warn!(error = %e, "resynchronizing active set from group listing");
            state.resync(&members);
        }
        state.adopt_group_size(members.len() as u32);
        state.prune_observed(&members);
        Ok(members)
    }

    fn check_growth(&self, size: u32) -> ReconcileResult<()> {
        if !self.bounds.can_grow(size) {
            return Err(StateError::OutOfBounds {
                size: size + 1,
                min: self.bounds.min_nodes,
                max: self.bounds.max_nodes,
            }
            .into());
        }
        Ok(())
    }

    fn check_shrink(&self, size: u32) -> ReconcileResult<()> {
        if !self.bounds.can_shrink(size) {
            return Err(StateError::OutOfBounds {
                size: size.saturating_sub(1),
                min: self.bounds.min_nodes,
                max: self.bounds.max_nodes,
            }
            .into());
        }
        Ok(())
    }

    /// Detect the grown node, wait for it to run, start the workload and
    /// commit.
    async fn provision(
        &self,
        state: &mut ControllerState,
        before: &BTreeSet<NodeId>,
    ) -> ReconcileResult<NodeId> {
        let node = self.wait_for_new_node(state, before).await?;
        state.observe(&node, NodeStatus::Provisioning);

        let ready = async {
            self.wait_until_running(state, &node).await?;
            self.start_workload(&node).await?;
            state.commit_growth(&node)?;
            Ok::<(), ReconcileError>(())
        }
        .await;

        if let Err(e) = ready {
            state.forget(&node);
            return Err(e);
        }
        Ok(node)
    }

    async fn wait_for_new_node(
        &self,
        state: &ControllerState,
        before: &BTreeSet<NodeId>,
    ) -> ReconcileResult<NodeId> {
        let window = PollWindow::start(self.poll);
        loop {
            match self.backend.list_nodes().await {
                Ok(after) => {
                    let new = after
                        .difference(before)
                        .find(|n| !state.is_active(n))
                        .cloned();
                    if let Some(node) = new {
                        debug!(node = %node, waited = ?window.elapsed(), "new node detected");
                        return Ok(node);
                    }
                }
                Err(e) => debug!(error = %e, "listing failed while waiting for new node"),
            }
            if !window.next().await {
                return Err(ReconcileError::Timeout {
                    stage: WaitStage::NodeDetection,
                    node: None,
                    waited: window.elapsed(),
                });
            }
        }
    }

    /// Poll `node` until it reports `Running`. On timeout the node is
    /// recorded as `Unreachable`.
    async fn wait_until_running(
        &self,
        state: &mut ControllerState,
        node: &str,
    ) -> ReconcileResult<()> {
        let window = PollWindow::start(self.poll);
        loop {
            match self.backend.describe_status(node).await {
                Ok(status) => {
                    state.observe(node, status);
                    if status.is_running() {
                        debug!(node = %node, waited = ?window.elapsed(), "node running");
                        return Ok(());
                    }
                    if status.is_terminal() {
                        return Err(ReconcileError::NodeLost {
                            node: node.to_string(),
                        });
                    }
                    debug!(node = %node, %status, "node not running yet");
                }
                Err(e) => debug!(node = %node, error = %e, "status poll failed"),
            }
            if !window.next().await {
                state.observe(node, NodeStatus::Unreachable);
                return Err(ReconcileError::Timeout {
                    stage: WaitStage::Readiness,
                    node: Some(node.to_string()),
                    waited: window.elapsed(),
                });
            }
        }
    }

    async fn start_workload(&self, node: &str) -> ReconcileResult<()> {
        self.backend
            .start_workload(node)
            .await
            .map_err(|source| ReconcileError::WorkloadStart {
                node: node.to_string(),
                source,
            })
    }

    async fn revert(&self, size: u32) {
        match self.backend.resize(size).await {
            Ok(()) => info!(size, "resize reverted"),
            Err(e) => error!(size, error = %e, "failed to revert resize"),
        }
    }
}
