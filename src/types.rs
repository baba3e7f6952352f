use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Cycling mode of a workflow: one timeline per workflow instance.
///
/// Points and intervals from different modes are never mixed; arithmetic
/// across modes fails with `CyclingModeMismatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclingMode {
    Integer,
    Datetime,
}

impl Default for CyclingMode {
    fn default() -> Self {
        CyclingMode::Integer
    }
}

impl FromStr for CyclingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "integer" => Ok(CyclingMode::Integer),
            "datetime" | "gregorian" => Ok(CyclingMode::Datetime),
            other => Err(format!(
                "invalid cycling_mode: {other} (expected \"integer\" or \"datetime\")"
            )),
        }
    }
}

/// What to do when a stall or inactivity timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutAction {
    /// Log a warning and keep the scheduler alive.
    Warn,
    /// Abort the scheduler with a human-readable reason.
    Abort,
}

impl Default for TimeoutAction {
    fn default() -> Self {
        TimeoutAction::Warn
    }
}

impl FromStr for TimeoutAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warn" => Ok(TimeoutAction::Warn),
            "abort" => Ok(TimeoutAction::Abort),
            other => Err(format!(
                "invalid timeout action: {other} (expected \"warn\" or \"abort\")"
            )),
        }
    }
}
