use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Decides when a control loop plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLoopType {
    /// Plans only when VJobs are queued or a running VJob is violated.
    Reactive,
    /// Plans on every tick.
    Periodic,
}

impl ControlLoopType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlLoopType::Reactive => "reactive",
            ControlLoopType::Periodic => "periodic",
        }
    }

    pub fn plans_every_tick(&self) -> bool {
        matches!(self, ControlLoopType::Periodic)
    }
}

impl FromStr for ControlLoopType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reactive" => Ok(ControlLoopType::Reactive),
            "periodic" => Ok(ControlLoopType::Periodic),
            _ => Err(ConfigError::UnknownLoopType(s.to_string())),
        }
    }
}

impl fmt::Display for ControlLoopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
