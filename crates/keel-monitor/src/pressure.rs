use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PressureThresholds;

/// Severity of resource usage.
///
/// Variants are ordered, so `level >= PressureLevel::Critical` reads as
/// "critical or worse".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PressureLevel {
    #[default]
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl PressureLevel {
    /// Classify a usage percentage.
    pub fn classify(usage: f64, thresholds: &PressureThresholds) -> Self {
        if usage >= thresholds.emergency {
            Self::Emergency
        } else if usage >= thresholds.critical {
            Self::Critical
        } else if usage >= thresholds.warning {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    /// `true` for any level above Normal.
    pub fn is_elevated(&self) -> bool {
        *self > Self::Normal
    }

    /// Hosts should pause optional features (prefetching, previews, ...) at
    /// Critical and above.
    pub fn should_throttle_optional(&self) -> bool {
        *self >= Self::Critical
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        };
        f.write_str(name)
    }
}
