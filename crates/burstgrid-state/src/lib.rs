//! burstgrid-state — the controller's single-owner state.
//!
//! `ControllerState` is owned by the control loop and lent to the
//! reconciler for the duration of one operation. It tracks:
//!
//! - `desired_group_size`: the size last committed to the fleet backend
//! - the active set: nodes confirmed running the workload, in activation order
//! - the last status observed for each group member
//!
//! Mutation goes through a small set of commit methods so that the
//! reconciler can only change state after the backend has confirmed the
//! corresponding effect.

pub mod error;
pub mod state;

pub use burstgrid_core::{Node, NodeId, NodeStatus};
pub use error::{StateError, StateResult};
pub use state::{ControllerState, GroupBounds};
