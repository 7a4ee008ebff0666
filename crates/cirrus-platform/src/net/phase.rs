use crate::error::{PlatformError, Result};
use std::fmt;
use std::sync::Mutex;

/// How far a convergence pass got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergencePhase {
    #[default]
    Idle,
    /// Interfaces brought down
    Stopped,
    /// Configuration files rewritten
    Written,
    /// Interfaces brought back up
    Started,
    Validated,
}

impl ConvergencePhase {
    pub fn can_transition_to(self, next: ConvergencePhase) -> bool {
        use ConvergencePhase::*;
        matches!(
            (self, next),
            (Idle, Stopped)
                | (Stopped, Written)
                | (Written, Started)
                | (Started, Validated)
                | (Idle, Validated)
        )
    }
}

impl fmt::Display for ConvergencePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvergencePhase::Idle => "idle",
            ConvergencePhase::Stopped => "stopped",
            ConvergencePhase::Written => "written",
            ConvergencePhase::Started => "started",
            ConvergencePhase::Validated => "validated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub(crate) struct PhaseTracker {
    current: Mutex<ConvergencePhase>,
}

impl PhaseTracker {
    pub(crate) fn current(&self) -> ConvergencePhase {
        self.current.lock().map(|p| *p).unwrap_or_default()
    }

    pub(crate) fn reset(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = ConvergencePhase::Idle;
        }
    }

    pub(crate) fn advance(&self, next: ConvergencePhase) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| PlatformError::InvalidTransition {
                from: "poisoned".to_string(),
                to: next.to_string(),
            })?;
        if !current.can_transition_to(next) {
            return Err(PlatformError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        *current = next;
        Ok(())
    }
}
