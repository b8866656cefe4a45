//! Synthetic CPU load with a triangular intensity ramp.
//!
//! Each worker thread repeats short sub-cycles: busy-compute for
//! `subcycle * intensity`, then sleep for the rest. Intensity climbs from
//! 0 to 1 over the first half of a cycle and falls back to 0 over the
//! second half.
//!
//! ```text
//! intensity
//!   1 |      /\        /\
//!     |     /  \      /  \
//!   0 |____/    \____/    \__
//!         cycle      cycle
//! ```

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Read-only settings shared by all generator threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampSettings {
    pub threads: u32,
    pub cycle: Duration,
    pub subcycle: Duration,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            threads: 1,
            cycle: Duration::from_secs(60),
            subcycle: Duration::from_millis(100),
        }
    }
}

/// Ramp intensity in `[0, 1]` at `elapsed` into a repeating `cycle`.
pub fn ramp_intensity(elapsed: Duration, cycle: Duration) -> f64 {
    if cycle.is_zero() {
        return 0.0;
    }
    let cycle_secs = cycle.as_secs_f64();
    let fraction = (elapsed.as_secs_f64() % cycle_secs) / cycle_secs;
    if fraction < 0.5 {
        fraction / 0.5
    } else {
        (1.0 - fraction) / 0.5
    }
}

/// Running generator threads.
#[derive(Debug)]
pub struct LoadGenerator {
    handles: Vec<JoinHandle<()>>,
}

impl LoadGenerator {
    /// Start `settings.threads` generator threads. They stop once
    /// `shutdown` turns true or its sender is dropped.
    pub fn spawn(settings: RampSettings, shutdown: watch::Receiver<bool>) -> std::io::Result<Self> {
        let mut handles = Vec::with_capacity(settings.threads as usize);
        for index in 0..settings.threads {
            let shutdown = shutdown.clone();
            let handle = std::thread::Builder::new()
                .name(format!("burst-load-{index}"))
                .spawn(move || run_ramp(settings, shutdown))?;
            handles.push(handle);
        }
        info!(
            threads = settings.threads,
            cycle_secs = settings.cycle.as_secs(),
            "load generator started"
        );
        Ok(Self { handles })
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for all threads to exit. Only returns after shutdown was
    /// signalled. Returns how many threads panicked.
    pub fn join(self) -> usize {
        let mut panicked = 0;
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("burst-load").to_string();
            if let Err(panic) = handle.join() {
                panicked += 1;
                warn!(
                    thread = %name,
                    panic = %panic_message(&*panic),
                    "load generator thread panicked"
                );
            }
        }
        debug!(panicked, "load generator stopped");
        panicked
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn stopped(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

fn run_ramp(settings: RampSettings, shutdown: watch::Receiver<bool>) {
    let start = Instant::now();
    while !stopped(&shutdown) {
        let intensity = ramp_intensity(start.elapsed(), settings.cycle);
        let busy = settings.subcycle.mul_f64(intensity);

        let burst = Instant::now();
        while burst.elapsed() < busy {
            std::hint::black_box((0..1000u64).map(|i| i * i).sum::<u64>());
        }
        std::thread::sleep(settings.subcycle.saturating_sub(busy));
    }
}
