//! Three-way hysteresis.

use std::fmt;

use burstgrid_core::ThresholdConfig;
use burstgrid_load::LoadSample;

/// Outcome of evaluating one load sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp,
    ScaleDown,
    Hold,
}

impl fmt::Display for ScaleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleDecision::ScaleUp => "scale_up",
            ScaleDecision::ScaleDown => "scale_down",
            ScaleDecision::Hold => "hold",
        };
        f.write_str(s)
    }
}

/// Map a sample onto exactly one decision.
///
/// Growth needs either metric above its up threshold; shrinking needs both
/// below their down thresholds. An unknown sample always holds.
pub fn evaluate(thresholds: &ThresholdConfig, sample: &LoadSample) -> ScaleDecision {
    if !sample.is_known() {
        return ScaleDecision::Hold;
    }
    let (cpu, mem) = (sample.cpu_percent, sample.mem_percent);

    if cpu > thresholds.cpu_up || mem > thresholds.mem_up {
        ScaleDecision::ScaleUp
    } else if cpu < thresholds.cpu_down && mem < thresholds.mem_down {
        ScaleDecision::ScaleDown
    } else {
        ScaleDecision::Hold
    }
}
