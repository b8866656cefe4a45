//! In-process fleet with scripted provisioning behaviour.
//!
//! `MemoryFleet` behaves like a slow managed group: a resize creates
//! members that only become visible after a number of `list_nodes` calls
//! and only report `Running` after a number of `describe_status` calls.
//! Failures can be injected per operation. The most recent calls are
//! recorded so tests can assert on the exact sequence the reconciler
//! issued.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use burstgrid_core::{NodeId, NodeStatus};

use crate::backend::FleetBackend;
use crate::error::{FleetError, FleetResult};

/// Calls kept by default; older ones are dropped first.
pub const DEFAULT_CALL_HISTORY: usize = 1024;

/// Operation kinds, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetOp {
    ListNodes,
    Resize,
    DescribeStatus,
    StartWorkload,
}

impl FleetOp {
    fn name(self) -> &'static str {
        match self {
            FleetOp::ListNodes => "list_nodes",
            FleetOp::Resize => "resize",
            FleetOp::DescribeStatus => "describe_status",
            FleetOp::StartWorkload => "start_workload",
        }
    }
}

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetCall {
    ListNodes,
    Resize(u32),
    DescribeStatus(NodeId),
    StartWorkload(NodeId),
}

#[derive(Debug)]
struct Member {
    status: NodeStatus,
    /// Describes left before reporting `Running`; `None` never.
    ready_in: Option<u32>,
    workload: bool,
    created: u64,
}

#[derive(Debug)]
struct Pending {
    id: NodeId,
    /// Listings left before the member shows up; `None` never.
    visible_in: Option<u32>,
    created: u64,
}

#[derive(Debug)]
struct Inner {
    prefix: String,
    next_index: u64,
    members: BTreeMap<NodeId, Member>,
    pending: Vec<Pending>,
    appear_after: Option<u32>,
    ready_after: Option<u32>,
    /// Status grown nodes report once visible.
    grown_status: NodeStatus,
    failures: HashMap<FleetOp, u32>,
    calls: VecDeque<FleetCall>,
    call_history: usize,
}

impl Inner {
    fn size(&self) -> u32 {
        (self.members.len() + self.pending.len()) as u32
    }

    fn record(&mut self, call: FleetCall) {
        if self.call_history == 0 {
            return;
        }
        while self.calls.len() >= self.call_history {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    fn injected_failure(&mut self, op: FleetOp) -> FleetResult<()> {
        if let Some(remaining) = self.failures.get_mut(&op)
            && *remaining > 0
        {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            return Err(FleetError::Rejected {
                op: op.name(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn grow_to(&mut self, desired: u32) {
        while self.size() < desired {
            self.next_index += 1;
            let id = format!("{}-{}", self.prefix, self.next_index);
            debug!(node = %id, "memory fleet: provisioning node");
            self.pending.push(Pending {
                id,
                visible_in: self.appear_after,
                created: self.next_index,
            });
        }
    }

    /// Remove the most recently created members first, pending ones before
    /// visible ones.
    fn shrink_to(&mut self, desired: u32) {
        while self.size() > desired {
            if let Some(p) = self.pending.pop() {
                debug!(node = %p.id, "memory fleet: cancelled pending node");
                continue;
            }
            let newest = self
                .members
                .iter()
                .max_by_key(|(_, m)| m.created)
                .map(|(id, _)| id.clone());
            match newest {
                Some(id) => {
                    self.members.remove(&id);
                    debug!(node = %id, "memory fleet: deleted node");
                }
                None => break,
            }
        }
    }

    fn promote_visible(&mut self) {
        let mut still_pending = Vec::new();
        for mut p in self.pending.drain(..) {
            match p.visible_in {
                Some(0) => {
                    self.members.insert(
                        p.id,
                        Member {
                            status: self.grown_status,
                            ready_in: self.ready_after,
                            workload: false,
                            created: p.created,
                        },
                    );
                }
                Some(n) => {
                    p.visible_in = Some(n - 1);
                    still_pending.push(p);
                }
                None => still_pending.push(p),
            }
        }
        self.pending = still_pending;
    }
}

/// A deterministic fleet held in memory.
#[derive(Debug)]
pub struct MemoryFleet {
    inner: Mutex<Inner>,
}

impl MemoryFleet {
    /// An empty fleet whose grown nodes are named `<prefix>-<n>`.
    ///
    /// By default new nodes are visible on the first listing after the
    /// resize and report `Running` on their first describe.
    pub fn new(prefix: &str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                prefix: prefix.to_string(),
                next_index: 0,
                members: BTreeMap::new(),
                pending: Vec::new(),
                appear_after: Some(0),
                ready_after: Some(0),
                grown_status: NodeStatus::Provisioning,
                failures: HashMap::new(),
                calls: VecDeque::new(),
                call_history: DEFAULT_CALL_HISTORY,
            }),
        }
    }

    /// Seed an existing member.
    pub fn with_node(mut self, id: &str, status: NodeStatus) -> Self {
        let inner = self.inner.get_mut();
        inner.next_index += 1;
        let created = inner.next_index;
        inner.members.insert(
            id.to_string(),
            Member {
                status,
                ready_in: if status.is_running() { Some(0) } else { inner.ready_after },
                workload: false,
                created,
            },
        );
        self
    }

    /// Grown nodes show up after `lists` extra listings.
    pub fn appear_after(mut self, lists: u32) -> Self {
        self.inner.get_mut().appear_after = Some(lists);
        self
    }

    /// Grown nodes never show up in a listing.
    pub fn never_appear(mut self) -> Self {
        self.inner.get_mut().appear_after = None;
        self
    }

    /// Nodes report `Running` after `describes` extra describes.
    pub fn ready_after(mut self, describes: u32) -> Self {
        self.inner.get_mut().ready_after = Some(describes);
        self
    }

    /// Nodes that are not yet running stay `Provisioning` forever.
    pub fn never_ready(mut self) -> Self {
        let inner = self.inner.get_mut();
        inner.ready_after = None;
        for member in inner.members.values_mut() {
            if !member.status.is_running() {
                member.ready_in = None;
            }
        }
        self
    }

    /// Grown nodes report `Terminated` as soon as they are visible.
    pub fn terminate_grown_nodes(mut self) -> Self {
        self.inner.get_mut().grown_status = NodeStatus::Terminated;
        self
    }

    /// Keep at most `calls` recorded calls; zero disables recording.
    pub fn with_call_history(mut self, calls: usize) -> Self {
        self.inner.get_mut().call_history = calls;
        self
    }

    /// The next `times` calls of `op` fail.
    pub fn fail(mut self, op: FleetOp, times: u32) -> Self {
        self.inner.get_mut().failures.insert(op, times);
        self
    }

    /// Every call of `op` fails.
    pub fn fail_always(self, op: FleetOp) -> Self {
        self.fail(op, u32::MAX)
    }

    /// Change failure injection on a shared fleet.
    pub async fn set_failures(&self, op: FleetOp, times: u32) {
        self.inner.lock().await.failures.insert(op, times);
    }

    /// Remove a member as if deleted outside the controller.
    pub async fn remove_node(&self, id: &str) -> bool {
        self.inner.lock().await.members.remove(id).is_some()
    }

    pub async fn calls(&self) -> Vec<FleetCall> {
        self.inner.lock().await.calls.iter().cloned().collect()
    }

    /// Sizes passed to `resize`, in call order.
    pub async fn resize_calls(&self) -> Vec<u32> {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|c| match c {
                FleetCall::Resize(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    /// Visible members, without recording a call.
    pub async fn members(&self) -> BTreeSet<NodeId> {
        self.inner.lock().await.members.keys().cloned().collect()
    }

    /// Members and pending nodes.
    pub async fn size(&self) -> u32 {
        self.inner.lock().await.size()
    }

    /// Members that have had a workload started.
    pub async fn workload_nodes(&self) -> BTreeSet<NodeId> {
        self.inner
            .lock()
            .await
            .members
            .iter()
            .filter(|(_, m)| m.workload)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl FleetBackend for MemoryFleet {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_nodes(&self) -> FleetResult<BTreeSet<NodeId>> {
        let mut inner = self.inner.lock().await;
        inner.record(FleetCall::ListNodes);
        inner.injected_failure(FleetOp::ListNodes)?;
        inner.promote_visible();
        Ok(inner.members.keys().cloned().collect())
    }

    async fn resize(&self, desired: u32) -> FleetResult<()> {
        let mut inner = self.inner.lock().await;
        inner.record(FleetCall::Resize(desired));
        inner.injected_failure(FleetOp::Resize)?;
        if desired > inner.size() {
            inner.grow_to(desired);
        } else {
            inner.shrink_to(desired);
        }
        Ok(())
    }

    async fn describe_status(&self, node: &str) -> FleetResult<NodeStatus> {
        let mut inner = self.inner.lock().await;
        inner.record(FleetCall::DescribeStatus(node.to_string()));
        inner.injected_failure(FleetOp::DescribeStatus)?;
        let member = inner
            .members
            .get_mut(node)
            .ok_or_else(|| FleetError::UnknownNode(node.to_string()))?;

        if member.status == NodeStatus::Provisioning {
            match member.ready_in {
                Some(0) => member.status = NodeStatus::Running,
                Some(n) => member.ready_in = Some(n - 1),
                None => {}
            }
        }
        Ok(member.status)
    }

    async fn start_workload(&self, node: &str) -> FleetResult<()> {
        let mut inner = self.inner.lock().await;
        inner.record(FleetCall::StartWorkload(node.to_string()));
        inner.injected_failure(FleetOp::StartWorkload)?;
        let member = inner
            .members
            .get_mut(node)
            .ok_or_else(|| FleetError::UnknownNode(node.to_string()))?;
        if !member.status.is_running() {
            return Err(FleetError::Rejected {
                op: FleetOp::StartWorkload.name(),
                reason: format!("{node} is {}", member.status),
            });
        }
        member.workload = true;
        Ok(())
    }
}
