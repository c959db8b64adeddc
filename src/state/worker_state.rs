use std::fmt;

/// Stage of a crawl worker while it handles one task
///
/// ```text
/// Idle -> Claiming -> Fetching -> Processing -> Persisting -> Idle
///            |           |            |             |
///            +-----------+------------+-------------+--> Failed -> Idle
/// ```
///
/// An empty claim goes straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Idle,
    Claiming,
    Fetching,
    Processing,
    Persisting,
    Failed,
}

impl WorkerState {
    /// Checks whether a worker may move from `self` to `next`
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;

        match (self, next) {
            (Idle, Claiming) => true,
            (Claiming, Idle) | (Claiming, Fetching) => true,
            (Fetching, Processing) => true,
            (Processing, Persisting) => true,
            (Persisting, Idle) => true,
            (Failed, Idle) => true,
            (Claiming | Fetching | Processing | Persisting, Failed) => true,
            _ => false,
        }
    }

    /// Moves to `next`, rejecting transitions the worker loop never makes
    pub fn transition(self, next: WorkerState) -> crate::Result<WorkerState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(crate::LurkerError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Returns true while the worker holds a claimed task
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Fetching | Self::Processing | Self::Persisting | Self::Failed
        )
    }

    /// Returns a short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Claiming => "claiming",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Persisting => "persisting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
