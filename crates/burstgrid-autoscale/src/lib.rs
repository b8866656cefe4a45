//! burstgrid-autoscale — reactive scaling of a worker group.
//!
//! Samples local load, maps it onto one of three decisions, and drives the
//! decision through the fleet backend one structural change at a time.
//!
//! # Scaling Algorithm
//!
//! ```text
//! ScaleUp   if cpu > cpu_up  OR  mem > mem_up
//! ScaleDown if cpu < cpu_down AND mem < mem_down
//! Hold      otherwise (and for unknown samples)
//!
//! ScaleUp:   idle member listed     → offload onto it
//!            none (or it is lost) → grow by one (if desired < max)
//! ScaleDown: active > min_active and desired > min → shrink by one
//! ```
//!
//! # Reconciliation
//!
//! ```text
//! grow_by_one
//!   ├── before = list_nodes()
//!   ├── resize(desired + 1)
//!   ├── poll list_nodes() until after \ before is non-empty   ─┐
//!   ├── poll describe_status(new) until Running                ├─ any failure → resize(desired)
//!   ├── start_workload(new)                                   ─┘
//!   └── commit: desired += 1, new joins the active set
//! ```
//!
//! Every listing realigns `ControllerState` with the group: active nodes
//! that left are dropped and the listed size becomes the desired size.
//! Beyond that, state is only committed after the backend confirmed the
//! effect, so a failed operation changes nothing else.

pub mod controller;
pub mod decision;
pub mod error;
pub mod poll;
pub mod reconciler;

pub use controller::{Controller, ScalingPolicy, TickOutcome, TickReport};
pub use decision::{ScaleDecision, evaluate};
pub use error::{ReconcileError, ReconcileResult, WaitStage};
pub use poll::{PollPolicy, PollWindow};
pub use reconciler::Reconciler;
