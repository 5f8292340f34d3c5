//! State - タスクとジョブの状態

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task as seen by the regulator.
///
/// State transitions:
/// - Created -> Pending -> Running -> Finished
/// - Created -> Pending -> Running -> RetryScheduled -> Pending (until retries run out)
/// - Created -> Pending -> Running -> Failed
/// - Pending -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Pending,
    Running,
    Finished,
    RetryScheduled,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Live tasks count against the one-live-instance rule.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Running | TaskState::RetryScheduled
        )
    }
}

/// Status of a job inside the external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_live(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}
