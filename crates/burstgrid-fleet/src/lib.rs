//! burstgrid-fleet — the fleet-management capability the controller drives.
//!
//! # Architecture
//!
//! ```text
//! FleetBackend (trait)
//!   ├── GcloudBackend  — `gcloud compute` managed instance groups
//!   └── MemoryFleet    — deterministic in-process fleet (tests, simulate)
//! ```
//!
//! Every call is independent. Nothing is assumed about consistency between
//! calls: a node may be listed before it reports a status, a listing may be
//! stale, and a resize may take effect long after it returns.

pub mod backend;
pub mod error;
pub mod gcloud;
pub mod memory;

pub use backend::FleetBackend;
pub use error::{FleetError, FleetResult};
pub use gcloud::{GcloudBackend, GcloudConfig};
pub use memory::{FleetCall, FleetOp, MemoryFleet};
