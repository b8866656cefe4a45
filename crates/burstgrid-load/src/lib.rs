//! burstgrid-load — local resource pressure in, synthetic pressure out.
//!
//! - [`LoadSource`] supplies `(cpu%, mem%)` samples to the controller.
//!   [`HostLoadSource`] reads them from the OS; [`ScriptedLoad`] replays a
//!   fixed sequence.
//! - [`LoadGenerator`] burns CPU in a triangular ramp so the controller has
//!   something to react to. It shares nothing with the controller beyond
//!   its own read-only settings.

pub mod generator;
pub mod source;

pub use generator::{LoadGenerator, RampSettings, ramp_intensity};
pub use source::{HostLoadSource, LoadSample, LoadSource, ScriptedLoad};
