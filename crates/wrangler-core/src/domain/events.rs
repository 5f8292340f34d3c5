//! Events - regulator notifications for external observers.

use super::fingerprint::ArgsFingerprint;
use super::ids::{JobId, TaskId};
use super::record::SerializedPayload;

#[derive(Debug, Clone, PartialEq)]
pub enum RegulatorEvent {
    /// First successful dispatch of a task.
    TaskCreated {
        task_id: TaskId,
        job_id: JobId,
        task_type: String,
    },

    /// Duplicate dispatch coalesced into an existing live task.
    TaskAlreadyScheduled {
        task_id: Option<TaskId>,
        job_id: Option<JobId>,
        task_type: String,
    },

    /// Schedule + persist did not complete; nothing was left behind.
    TaskSchedulingFailed {
        payload: SerializedPayload,
        args_fingerprint: ArgsFingerprint,
        error: String,
    },

    /// Storage was unavailable, so the task ran inline without persistence.
    TaskDispatchedSynchronously {
        task_type: String,
        args_fingerprint: ArgsFingerprint,
        error: Option<String>,
    },

    /// A herding sweep completed.
    HerdingProcessed { deleted: usize },
}

impl RegulatorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RegulatorEvent::TaskCreated { .. } => "task_created",
            RegulatorEvent::TaskAlreadyScheduled { .. } => "task_already_scheduled",
            RegulatorEvent::TaskSchedulingFailed { .. } => "task_scheduling_failed",
            RegulatorEvent::TaskDispatchedSynchronously { .. } => "task_dispatched_synchronously",
            RegulatorEvent::HerdingProcessed { .. } => "herding_processed",
        }
    }
}
