//! End-to-end controller scenarios.
//!
//! Each scenario wires a real `Controller` to an in-memory fleet and a
//! scripted load source, then checks the backend calls it made and the
//! state it committed. Everything runs in-process under a paused tokio
//! clock, so multi-minute polling windows finish instantly.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::watch;

use burstgrid_autoscale::{
    Controller, PollPolicy, ReconcileError, Reconciler, ScaleDecision, ScalingPolicy, TickOutcome,
    WaitStage,
};
use burstgrid_core::ControllerConfig;
use burstgrid_fleet::{FleetBackend, FleetCall, MemoryFleet};
use burstgrid_load::ScriptedLoad;
use burstgrid_state::{ControllerState, NodeStatus, StateError};

const CONFIG: &str = r#"
[group]
name = "burst-group"
zone = "us-central1-a"

[controller]
check_interval_secs = 10
min_nodes = 1
max_nodes = 3
min_active_nodes = 1

[reconcile]
poll_interval_secs = 5
timeout_secs = 300
"#;

fn config() -> ControllerConfig {
    ControllerConfig::parse(CONFIG).unwrap()
}

fn controller_with_state(
    config: &ControllerConfig,
    fleet: &Arc<MemoryFleet>,
    load: ScriptedLoad,
    state: ControllerState,
) -> Controller<ScriptedLoad> {
    let policy = ScalingPolicy::from_config(config);
    let poll = PollPolicy {
        interval: config.poll_interval(),
        timeout: config.wait_timeout(),
    };
    let backend: Arc<dyn FleetBackend> = fleet.clone();
    let reconciler = Reconciler::new(backend, poll, policy.bounds);
    Controller::new(load, reconciler, policy, state, config.check_interval())
}

#[tokio::test(start_paused = true)]
async fn scale_up_offloads_onto_idle_node() {
    let config = config();
    let fleet = Arc::new(MemoryFleet::new("n").with_node("n1", NodeStatus::Running));
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(80.0, 40.0), fleet.clone());

    let report = ctl.tick().await;

    assert_eq!(report.decision, ScaleDecision::ScaleUp);
    assert!(matches!(report.outcome, TickOutcome::Offloaded(ref n) if n == "n1"));
    assert_eq!(ctl.state().active_nodes(), ["n1".to_string()]);
    assert_eq!(ctl.state().desired_group_size(), 1);
    assert!(fleet.resize_calls().await.is_empty());
    assert_eq!(
        fleet.workload_nodes().await,
        BTreeSet::from(["n1".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn scale_up_reverts_when_no_node_appears() {
    // desired = 1, nothing active, and the only member is dead: there is
    // no idle node to offload onto.
    let config = config();
    let fleet = Arc::new(
        MemoryFleet::new("n")
            .with_node("n1", NodeStatus::Terminated)
            .never_appear(),
    );
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(80.0, 40.0), fleet.clone());

    let report = ctl.tick().await;

    match report.outcome {
        TickOutcome::Failed(ReconcileError::Timeout { stage, .. }) => {
            assert_eq!(stage, WaitStage::NodeDetection)
        }
        other => panic!("expected a timed-out growth, got {other:?}"),
    }
    assert_eq!(fleet.resize_calls().await, vec![2, 1]);
    assert_eq!(fleet.size().await, 1);
    assert_eq!(ctl.state().desired_group_size(), 1);
    assert!(ctl.state().active_nodes().is_empty());

    // The dead member is skipped from now on; growth is retried.
    let report = ctl.tick().await;
    assert!(matches!(report.outcome, TickOutcome::Failed(ref e) if e.is_timeout()));
    assert_eq!(fleet.resize_calls().await, vec![2, 1, 2, 1]);
    let describes = fleet
        .calls()
        .await
        .iter()
        .filter(|c| matches!(c, FleetCall::DescribeStatus(_)))
        .count();
    assert_eq!(describes, 1);
}

#[tokio::test(start_paused = true)]
async fn growth_reverts_when_all_members_are_active() {
    let config = config();
    let fleet = Arc::new(
        MemoryFleet::new("n")
            .with_node("n1", NodeStatus::Running)
            .never_appear(),
    );
    let mut state = ControllerState::new(1);
    state.commit_offload("n1").unwrap();
    let mut ctl = controller_with_state(&config, &fleet, ScriptedLoad::constant(80.0, 40.0), state);

    let report = ctl.tick().await;

    assert!(matches!(report.outcome, TickOutcome::Failed(ref e) if e.is_timeout()));
    assert_eq!(fleet.resize_calls().await, vec![2, 1]);
    assert_eq!(ctl.state().desired_group_size(), 1);
    assert_eq!(ctl.state().active_nodes(), ["n1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn scale_up_never_shrinks_a_prepopulated_group() {
    let config = config();
    let fleet = Arc::new(
        MemoryFleet::new("n")
            .with_node("a", NodeStatus::Running)
            .with_node("b", NodeStatus::Running)
            .with_node("c", NodeStatus::Running),
    );
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(90.0, 30.0), fleet.clone());

    let mut offloaded = Vec::new();
    for _ in 0..3 {
        match ctl.tick().await.outcome {
            TickOutcome::Offloaded(node) => offloaded.push(node),
            other => panic!("expected an offload, got {other:?}"),
        }
        assert_eq!(fleet.size().await, 3);
    }
    assert_eq!(offloaded, ["a", "b", "c"]);
    assert!(fleet.resize_calls().await.is_empty());
    assert_eq!(ctl.state().desired_group_size(), 3);

    // At max_nodes = 3 with every member busy.
    assert!(matches!(ctl.tick().await.outcome, TickOutcome::AtMaximum));
    assert!(fleet.resize_calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn startup_sync_adopts_group_size() {
    let config = config();
    let fleet = Arc::new(
        MemoryFleet::new("n")
            .with_node("a", NodeStatus::Running)
            .with_node("b", NodeStatus::Running),
    );
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(30.0, 20.0), fleet.clone());

    assert_eq!(ctl.sync_with_group().await.unwrap(), 2);
    assert_eq!(ctl.state().desired_group_size(), 2);

    // Nothing is active, so low load cannot shrink the group.
    assert!(matches!(ctl.tick().await.outcome, TickOutcome::AtMinimum));
    assert!(fleet.resize_calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn startup_sync_refuses_group_above_maximum() {
    let config = config();
    let mut fleet = MemoryFleet::new("n");
    for i in 1..=4 {
        fleet = fleet.with_node(&format!("n{i}"), NodeStatus::Running);
    }
    let fleet = Arc::new(fleet);
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(60.0, 60.0), fleet.clone());

    let err = ctl.sync_with_group().await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::State(StateError::OutOfBounds { size: 4, min: 1, max: 3 })
    ));
    assert!(fleet.resize_calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scale_down_removes_exactly_one_node() {
    let config = config();
    let fleet = Arc::new(
        MemoryFleet::new("n")
            .with_node("n1", NodeStatus::Running)
            .with_node("n2", NodeStatus::Running),
    );
    let mut state = ControllerState::new(2);
    state.commit_offload("n1").unwrap();
    state.commit_offload("n2").unwrap();
    let mut ctl = controller_with_state(&config, &fleet, ScriptedLoad::constant(30.0, 20.0), state);

    let report = ctl.tick().await;

    assert_eq!(report.decision, ScaleDecision::ScaleDown);
    assert!(matches!(report.outcome, TickOutcome::Shrank(ref n) if n == "n2"));
    assert_eq!(fleet.resize_calls().await, vec![1]);
    assert_eq!(ctl.state().active_nodes(), ["n1".to_string()]);
    assert_eq!(ctl.state().desired_group_size(), 1);
    assert_eq!(fleet.members().await, BTreeSet::from(["n1".to_string()]));
}

#[tokio::test(start_paused = true)]
async fn load_between_thresholds_makes_no_calls() {
    let config = config();
    let fleet = Arc::new(MemoryFleet::new("n").with_node("n1", NodeStatus::Running));
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(60.0, 60.0), fleet.clone());

    for _ in 0..3 {
        let report = ctl.tick().await;
        assert!(matches!(report.outcome, TickOutcome::Held));
    }
    assert!(fleet.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn ramp_up_and_down_respects_bounds() {
    let config = config();
    let fleet = Arc::new(MemoryFleet::new("burst").with_node("burst-1", NodeStatus::Running));
    let load = ScriptedLoad::new([
        (90.0, 30.0),
        (90.0, 30.0),
        (90.0, 30.0),
        (90.0, 30.0),
        (60.0, 60.0),
        (20.0, 20.0),
        (20.0, 20.0),
        (20.0, 20.0),
    ]);
    let mut ctl = Controller::from_config(&config, load, fleet.clone());

    let mut outcomes = Vec::new();
    for _ in 0..8 {
        let report = ctl.tick().await;
        outcomes.push(format!("{:?}", report.outcome));

        let state = ctl.state();
        assert!((1..=3).contains(&state.desired_group_size()));
        assert!(state.active_len() <= state.desired_group_size());
        let members = fleet.members().await;
        assert!(state.active_nodes().iter().all(|n| members.contains(n)));
    }

    assert_eq!(
        outcomes,
        [
            "Offloaded(\"burst-1\")",
            "Grew(\"burst-2\")",
            "Grew(\"burst-3\")",
            "AtMaximum",
            "Held",
            "Shrank(\"burst-3\")",
            "Shrank(\"burst-2\")",
            "AtMinimum",
        ]
    );
    assert_eq!(fleet.resize_calls().await, vec![2, 3, 2, 1]);
    assert_eq!(ctl.state().active_nodes(), ["burst-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn active_set_only_grows_on_confirmed_nodes() {
    let config = config();
    let fleet = Arc::new(
        MemoryFleet::new("burst")
            .with_node("burst-1", NodeStatus::Running)
            .never_ready(),
    );
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(90.0, 30.0), fleet.clone());

    // The seeded node is already running, so offload succeeds.
    assert!(matches!(ctl.tick().await.outcome, TickOutcome::Offloaded(_)));

    // Grown nodes never report running: every growth attempt reverts.
    for _ in 0..2 {
        let report = ctl.tick().await;
        assert!(matches!(
            report.outcome,
            TickOutcome::Failed(ReconcileError::Timeout { .. })
        ));
        assert_eq!(ctl.state().active_nodes(), ["burst-1".to_string()]);
        assert_eq!(ctl.state().desired_group_size(), 1);
    }
    assert_eq!(fleet.size().await, 1);
    assert!(
        fleet
            .calls()
            .await
            .iter()
            .filter(|c| matches!(c, FleetCall::StartWorkload(_)))
            .count()
            == 1
    );
}

#[tokio::test(start_paused = true)]
async fn run_loop_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = ControllerConfig::from_file(file.path()).unwrap();

    let fleet = Arc::new(MemoryFleet::new("burst").with_node("burst-1", NodeStatus::Running));
    let mut ctl = Controller::from_config(&config, ScriptedLoad::constant(90.0, 30.0), fleet.clone());

    let (_tx, rx) = watch::channel(false);
    ctl.run(rx, Some(5)).await;

    assert_eq!(ctl.ticks(), 5);
    let state = ctl.into_state();
    assert_eq!(state.desired_group_size(), 3);
    assert_eq!(state.active_len(), 3);
    assert_eq!(fleet.size().await, 3);
}
