//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `TaskState`: Lifecycle of a queued task (pending, claimed, done, failed)
//! - `WorkerState`: Stage a crawl worker is in while it handles one task

mod task_state;
mod worker_state;

// Re-export main types
pub use task_state::TaskState;
pub use worker_state::WorkerState;
