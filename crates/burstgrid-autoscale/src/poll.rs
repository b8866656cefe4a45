//! Fixed-period polling with a hard wall-clock deadline.
//!
//! Waits go through `tokio::time`, so they can be raced against a
//! shutdown signal and run instantly under a paused test clock.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// One bounded wait.
#[derive(Debug)]
pub struct PollWindow {
    started: Instant,
    deadline: Instant,
    interval: Duration,
}

impl PollWindow {
    pub fn start(policy: PollPolicy) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + policy.timeout,
            interval: policy.interval,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Sleep until the next poll is due, never past the deadline.
    ///
    /// Returns `false` once the deadline has passed; the caller should stop
    /// polling. The last poll happens at the deadline itself.
    pub async fn next(&self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        let wake = (now + self.interval).min(self.deadline);
        tokio::time::sleep_until(wake).await;
        true
    }
}
