/// Task state definitions for the durable crawl queue
///
/// A task lives in the `tasks` table while pending or claimed; the terminal
/// states only exist as rows in the done and failure ledgers.
use std::fmt;

/// Represents the current state of a task in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Task is queued and may be claimed by any worker
    Pending,

    /// Task has been claimed by a worker (`locked_at` is set)
    Claimed,

    /// Task was processed; recorded in the done ledger
    Done,

    /// Task failed; recorded in the failure ledger with a category
    Failed,
}

impl TaskState {
    /// Derives the state of a row still present in the `tasks` table
    pub fn from_lock(locked: bool) -> Self {
        if locked {
            Self::Claimed
        } else {
            Self::Pending
        }
    }

    /// Checks whether the queue may move a task from `self` to `next`
    ///
    /// Claims are only released back to pending at the start of a run.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Claimed)
                | (Self::Claimed, Self::Pending)
                | (Self::Claimed, Self::Done)
                | (Self::Claimed, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
