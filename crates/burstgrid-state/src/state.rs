//! Controller state and its commit operations.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use burstgrid_core::{Node, NodeId, NodeStatus, RemovalOrder};

use crate::error::{StateError, StateResult};

/// Inclusive limits on the group size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupBounds {
    pub min_nodes: u32,
    pub max_nodes: u32,
}

impl GroupBounds {
    pub fn new(min_nodes: u32, max_nodes: u32) -> Self {
        Self { min_nodes, max_nodes }
    }

    pub fn contains(&self, size: u32) -> bool {
        size >= self.min_nodes && size <= self.max_nodes
    }

    pub fn can_grow(&self, size: u32) -> bool {
        size < self.max_nodes
    }

    pub fn can_shrink(&self, size: u32) -> bool {
        size > self.min_nodes
    }
}

/// The controller's view of the group.
///
/// `active` keeps activation order so removal policies can pick the newest
/// or the oldest active node deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerState {
    desired_group_size: u32,
    active: Vec<NodeId>,
    observed: BTreeMap<NodeId, NodeStatus>,
}

impl ControllerState {
    /// State for a group believed to hold `initial_size` members, none of
    /// which carry load yet.
    pub fn new(initial_size: u32) -> Self {
        Self {
            desired_group_size: initial_size,
            active: Vec::new(),
            observed: BTreeMap::new(),
        }
    }

    pub fn desired_group_size(&self) -> u32 {
        self.desired_group_size
    }

    /// Active nodes in activation order, oldest first.
    pub fn active_nodes(&self) -> &[NodeId] {
        &self.active
    }

    pub fn active_len(&self) -> u32 {
        self.active.len() as u32
    }

    pub fn is_active(&self, node: &str) -> bool {
        self.active.iter().any(|n| n == node)
    }

    /// Whether the active set is smaller than the group, i.e. some member
    /// may be idle.
    pub fn has_idle_capacity(&self) -> bool {
        self.active_len() < self.desired_group_size
    }

    /// Record the status most recently reported for a node.
    pub fn observe(&mut self, node: &str, status: NodeStatus) {
        self.observed.insert(node.to_string(), status);
    }

    pub fn observed_status(&self, node: &str) -> Option<NodeStatus> {
        self.observed.get(node).copied()
    }

    /// Drop the observation of an inactive node.
    pub fn forget(&mut self, node: &str) {
        if !self.is_active(node) {
            self.observed.remove(node);
        }
    }

    /// Members of `members` that are not carrying load and may still take
    /// it, in offload preference order.
    ///
    /// Members last seen `Terminated` are left out. Members last seen
    /// `Unreachable` come after the rest. Ties go to the smallest ID.
    pub fn idle_members(&self, members: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut idle: Vec<&NodeId> = members
            .iter()
            .filter(|m| !self.is_active(m))
            .filter(|m| !self.observed_status(m).is_some_and(NodeStatus::is_terminal))
            .collect();
        idle.sort_by_key(|m| self.observed_status(m) == Some(NodeStatus::Unreachable));
        idle.into_iter().cloned().collect()
    }

    /// Take the group size reported by the backend as the desired size.
    ///
    /// Returns the previous desired size. Callers resync the active set
    /// against the same listing first, so I1 still holds.
    pub fn adopt_group_size(&mut self, size: u32) -> u32 {
        let previous = self.desired_group_size;
        if previous != size {
            warn!(
                desired = previous,
                listed = size,
                "group size differs from desired size; adopting listed size"
            );
            self.desired_group_size = size.max(self.active_len());
        }
        previous
    }

    /// Drop observations of nodes that are neither active nor listed.
    pub fn prune_observed(&mut self, members: &BTreeSet<NodeId>) {
        let active = &self.active;
        self.observed
            .retain(|id, _| members.contains(id) || active.iter().any(|a| a == id));
    }

    /// All nodes the controller knows of, active or merely observed.
    pub fn nodes(&self) -> Vec<Node> {
        let mut ids: BTreeSet<&NodeId> = self.observed.keys().collect();
        ids.extend(self.active.iter());
        ids.into_iter()
            .map(|id| Node {
                id: id.clone(),
                status: self
                    .observed_status(id)
                    .unwrap_or(NodeStatus::Running),
                carries_load: self.is_active(id),
            })
            .collect()
    }

    /// The active node a scale-down would remove.
    pub fn removal_candidate(&self, order: RemovalOrder) -> Option<&NodeId> {
        match order {
            RemovalOrder::NewestFirst => self.active.last(),
            RemovalOrder::OldestFirst => self.active.first(),
        }
    }

    /// Commit a confirmed growth: the group grew by one and `node` is
    /// running the workload.
    pub fn commit_growth(&mut self, node: &str) -> StateResult<()> {
        if self.is_active(node) {
            return Err(StateError::InvariantViolation(format!(
                "grown node {node} is already active"
            )));
        }
        self.desired_group_size += 1;
        self.activate(node);
        Ok(())
    }

    /// Commit a confirmed offload onto an existing idle member.
    pub fn commit_offload(&mut self, node: &str) -> StateResult<()> {
        if self.is_active(node) {
            return Err(StateError::InvariantViolation(format!(
                "offload target {node} is already active"
            )));
        }
        if !self.has_idle_capacity() {
            return Err(StateError::InvariantViolation(format!(
                "offload would make {} active nodes in a group of {}",
                self.active_len() + 1,
                self.desired_group_size
            )));
        }
        self.activate(node);
        Ok(())
    }

    /// Commit a confirmed shrink: the group lost one member and `node` no
    /// longer counts as active.
    pub fn commit_shrink(&mut self, node: &str) -> StateResult<()> {
        let Some(pos) = self.active.iter().position(|n| n == node) else {
            return Err(StateError::InvariantViolation(format!(
                "shrink target {node} is not active"
            )));
        };
        if self.desired_group_size == 0 {
            return Err(StateError::InvariantViolation(
                "shrink of an empty group".to_string(),
            ));
        }
        self.active.remove(pos);
        self.observed.remove(node);
        self.desired_group_size -= 1;
        Ok(())
    }

    /// Check the invariants that hold between operations.
    ///
    /// `members` is a fresh listing from the backend.
    pub fn check_invariants(
        &self,
        members: &BTreeSet<NodeId>,
        bounds: GroupBounds,
    ) -> StateResult<()> {
        if self.active_len() > self.desired_group_size {
            return Err(StateError::InvariantViolation(format!(
                "{} active nodes exceed desired group size {}",
                self.active_len(),
                self.desired_group_size
            )));
        }
        if let Some(missing) = self.active.iter().find(|n| !members.contains(*n)) {
            return Err(StateError::InvariantViolation(format!(
                "active node {missing} is not a group member"
            )));
        }
        if !bounds.contains(self.desired_group_size) {
            return Err(StateError::OutOfBounds {
                size: self.desired_group_size,
                min: bounds.min_nodes,
                max: bounds.max_nodes,
            });
        }
        Ok(())
    }

    /// Drop active nodes that are no longer group members.
    ///
    /// Returns the dropped IDs. Activation order of the survivors is kept.
    pub fn resync(&mut self, members: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let (kept, dropped): (Vec<NodeId>, Vec<NodeId>) = self
            .active
            .drain(..)
            .partition(|n| members.contains(n));
        self.active = kept;
        for node in &dropped {
            self.observed.remove(node);
            warn!(node = %node, "active node left the group; dropped from active set");
        }
        dropped
    }

    fn activate(&mut self, node: &str) {
        self.active.push(node.to_string());
        self.observed.insert(node.to_string(), NodeStatus::Running);
        debug!(
            node = %node,
            active = self.active.len(),
            desired = self.desired_group_size,
            "node activated"
        );
    }
}
