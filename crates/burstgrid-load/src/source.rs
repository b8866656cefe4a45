//! Load sampling.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::System;
use tracing::{debug, warn};

/// One reading of local resource pressure, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

impl LoadSample {
    /// Reading that could not be taken. Never triggers a scaling action.
    pub const UNKNOWN: LoadSample = LoadSample {
        cpu_percent: f64::NAN,
        mem_percent: f64::NAN,
    };

    pub fn new(cpu_percent: f64, mem_percent: f64) -> Self {
        Self {
            cpu_percent,
            mem_percent,
        }
    }

    /// Both readings are finite and within `[0, 100]`.
    pub fn is_known(&self) -> bool {
        valid_percent(self.cpu_percent) && valid_percent(self.mem_percent)
    }
}

fn valid_percent(v: f64) -> bool {
    v.is_finite() && (0.0..=100.0).contains(&v)
}

/// Supplier of load samples. May block for its sampling window; never
/// fails, returning [`LoadSample::UNKNOWN`] instead.
#[async_trait]
pub trait LoadSource: Send {
    async fn sample(&mut self) -> LoadSample;
}

/// Host CPU and memory usage via `sysinfo`.
pub struct HostLoadSource {
    system: System,
    window: Duration,
}

impl std::fmt::Debug for HostLoadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLoadSource")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl HostLoadSource {
    /// CPU usage is averaged over `window`, clamped to sysinfo's minimum
    /// update interval.
    pub fn new(window: Duration) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        Self {
            system,
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl Default for HostLoadSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl LoadSource for HostLoadSource {
    async fn sample(&mut self) -> LoadSample {
        self.system.refresh_cpu_all();
        tokio::time::sleep(self.window).await;
        self.system.refresh_cpu_all();
        self.system.refresh_memory();

        let cpu = f64::from(self.system.global_cpu_usage());
        let total = self.system.total_memory();
        let mem = if total == 0 {
            f64::NAN
        } else {
            self.system.used_memory() as f64 / total as f64 * 100.0
        };

        let sample = LoadSample::new(cpu, mem);
        if !sample.is_known() {
            warn!(cpu, mem, "host load reading out of range");
            return LoadSample::UNKNOWN;
        }
        debug!(cpu, mem, "host load sampled");
        sample
    }
}

/// Replays a fixed list of samples, then repeats the last one.
///
/// An empty script yields [`LoadSample::UNKNOWN`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedLoad {
    samples: VecDeque<LoadSample>,
    last: Option<LoadSample>,
}

impl ScriptedLoad {
    pub fn new(samples: impl IntoIterator<Item = (f64, f64)>) -> Self {
        Self {
            samples: samples
                .into_iter()
                .map(|(cpu, mem)| LoadSample::new(cpu, mem))
                .collect(),
            last: None,
        }
    }

    /// A source that always reports the same load.
    pub fn constant(cpu: f64, mem: f64) -> Self {
        Self::new([(cpu, mem)])
    }

    pub fn push(&mut self, cpu: f64, mem: f64) {
        self.samples.push_back(LoadSample::new(cpu, mem));
    }
}

#[async_trait]
impl LoadSource for ScriptedLoad {
    async fn sample(&mut self) -> LoadSample {
        if let Some(next) = self.samples.pop_front() {
            self.last = Some(next);
        }
        self.last.unwrap_or(LoadSample::UNKNOWN)
    }
}
