//! Controller — the sample → decide → reconcile loop.
//!
//! The controller owns `ControllerState` outright and runs strictly
//! serially: a tick's reconciliation finishes (success, failure or
//! timeout) before the next sample is taken. Shutdown is only observed
//! between ticks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use burstgrid_core::{ControllerConfig, RemovalOrder, ThresholdConfig};
use burstgrid_fleet::FleetBackend;
use burstgrid_load::{LoadSample, LoadSource};
use burstgrid_state::{ControllerState, GroupBounds, NodeId};

use crate::decision::{ScaleDecision, evaluate};
use crate::error::{ReconcileError, ReconcileResult};
use crate::poll::PollPolicy;
use crate::reconciler::Reconciler;

/// Decision and placement policy, fixed for the controller's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    pub thresholds: ThresholdConfig,
    pub bounds: GroupBounds,
    /// Scale-down never takes the active set below this.
    pub min_active_nodes: u32,
    pub removal_order: RemovalOrder,
}

impl ScalingPolicy {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            thresholds: config.thresholds,
            bounds: GroupBounds::new(config.controller.min_nodes, config.controller.max_nodes),
            min_active_nodes: config.controller.min_active_nodes,
            removal_order: config.controller.removal_order,
        }
    }
}

/// What one tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// No backend call was made.
    Held,
    Offloaded(NodeId),
    Grew(NodeId),
    Shrank(NodeId),
    /// Scale-up wanted, but the group is at `max_nodes` with no idle member.
    AtMaximum,
    /// Scale-down wanted, but a floor would be crossed.
    AtMinimum,
    /// Reconciliation failed; state is unchanged.
    Failed(ReconcileError),
}

#[derive(Debug)]
pub struct TickReport {
    pub sample: LoadSample,
    pub decision: ScaleDecision,
    pub outcome: TickOutcome,
}

pub struct Controller<L> {
    load: L,
    reconciler: Reconciler,
    policy: ScalingPolicy,
    state: ControllerState,
    interval: Duration,
    ticks: u64,
}

impl<L: LoadSource> Controller<L> {
    pub fn new(
        load: L,
        reconciler: Reconciler,
        policy: ScalingPolicy,
        state: ControllerState,
        interval: Duration,
    ) -> Self {
        Self {
            load,
            reconciler,
            policy,
            state,
            interval,
            ticks: 0,
        }
    }

    /// Wire a controller from a validated config. The state starts at
    /// `min_nodes` members, none carrying load, until
    /// [`sync_with_group`](Self::sync_with_group) or the first listing
    /// corrects it.
    pub fn from_config(config: &ControllerConfig, load: L, backend: Arc<dyn FleetBackend>) -> Self {
        let policy = ScalingPolicy::from_config(config);
        let reconciler = Reconciler::new(
            backend,
            PollPolicy {
                interval: config.poll_interval(),
                timeout: config.wait_timeout(),
            },
            policy.bounds,
        );
        Self::new(
            load,
            reconciler,
            policy,
            ControllerState::new(config.controller.min_nodes),
            config.check_interval(),
        )
    }

    /// Adopt the group's current membership before the first tick.
    ///
    /// Fails if the group cannot be listed or its size is outside
    /// `[min_nodes, max_nodes]`.
    pub async fn sync_with_group(&mut self) -> ReconcileResult<u32> {
        let size = self.reconciler.sync_group(&mut self.state).await?;
        info!(size, "controller state synced with group");
        Ok(size)
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn into_state(self) -> ControllerState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Take one sample and carry out at most one scaling action.
    pub async fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let sample = self.load.sample().await;
        let decision = evaluate(&self.policy.thresholds, &sample);

        info!(
            tick = self.ticks,
            cpu = sample.cpu_percent,
            mem = sample.mem_percent,
            %decision,
            desired = self.state.desired_group_size(),
            active = self.state.active_len(),
            "load sampled"
        );

        let outcome = match decision {
            ScaleDecision::ScaleUp => self.scale_up().await,
            ScaleDecision::ScaleDown => self.scale_down().await,
            ScaleDecision::Hold => {
                if !sample.is_known() {
                    debug!("load sample unavailable; holding");
                }
                debug!(active = ?self.state.active_nodes(), "holding");
                TickOutcome::Held
            }
        };

        if let TickOutcome::Failed(e) = &outcome {
            warn!(%decision, error = %e, "reconciliation failed; retrying next tick");
        }

        TickReport {
            sample,
            decision,
            outcome,
        }
    }

    async fn scale_up(&mut self) -> TickOutcome {
        match self.reconciler.offload_to_idle_node(&mut self.state).await {
            Ok(node) => return TickOutcome::Offloaded(node),
            Err(ReconcileError::NoIdleNode) => {
                debug!("no idle node to offload onto");
            }
            Err(ReconcileError::NodeLost { node }) => {
                warn!(node = %node, "idle node terminated; growing instead");
            }
            Err(e) => return TickOutcome::Failed(e),
        }

        if !self.policy.bounds.can_grow(self.state.desired_group_size()) {
            info!(
                max = self.policy.bounds.max_nodes,
                "maximum group size reached; offloading already in effect"
            );
            return TickOutcome::AtMaximum;
        }

        match self.reconciler.grow_by_one(&mut self.state).await {
            Ok(node) => TickOutcome::Grew(node),
            Err(e) => TickOutcome::Failed(e),
        }
    }

    async fn scale_down(&mut self) -> TickOutcome {
        if self.state.active_len() <= self.policy.min_active_nodes {
            debug!(
                active = self.state.active_len(),
                floor = self.policy.min_active_nodes,
                "at minimum active nodes; not scaling down"
            );
            return TickOutcome::AtMinimum;
        }
        if !self.policy.bounds.can_shrink(self.state.desired_group_size()) {
            debug!(
                min = self.policy.bounds.min_nodes,
                "at minimum group size; not scaling down"
            );
            return TickOutcome::AtMinimum;
        }
        let Some(node) = self
            .state
            .removal_candidate(self.policy.removal_order)
            .cloned()
        else {
            return TickOutcome::AtMinimum;
        };

        match self.reconciler.shrink_by_one(&mut self.state, &node).await {
            Ok(()) => TickOutcome::Shrank(node),
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Tick every `interval` until `shutdown` turns true (or its sender is
    /// dropped), or until `max_ticks` ticks have run.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>, max_ticks: Option<u64>) {
        info!(
            interval_secs = self.interval.as_secs(),
            min = self.policy.bounds.min_nodes,
            max = self.policy.bounds.max_nodes,
            "controller started"
        );

        let mut ran = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;
            ran += 1;
            if max_ticks.is_some_and(|max| ran >= max) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {}
            }
            if shutdown.has_changed().is_err() {
                break;
            }
        }

        info!(
            ticks = ran,
            desired = self.state.desired_group_size(),
            active = ?self.state.active_nodes(),
            "controller stopped"
        );
    }
}
