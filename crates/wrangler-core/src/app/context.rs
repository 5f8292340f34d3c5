//! ExecutionContext - 実行中ジョブの追跡
//!
//! Owned by the worker that runs scheduler jobs. The scheduler's
//! before/after notifications keep the single "current job" slot up to
//! date; `Regulator::process_task` reads it to find the task row.

use crate::domain::JobId;
use crate::ports::SchedulerNotification;

#[derive(Debug, Default)]
pub struct ExecutionContext {
    current_job: Option<JobId>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context already positioned on `job_id`, as after `BeforeExecute`.
    pub fn for_job(job_id: JobId) -> Self {
        Self {
            current_job: Some(job_id),
        }
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.current_job
    }

    /// Apply an execution notification. `JobDeleted` does not touch the
    /// slot; it is routed to `Regulator::on_job_deleted`.
    pub fn observe(&mut self, notification: &SchedulerNotification) {
        match notification {
            SchedulerNotification::BeforeExecute(job_id) => self.current_job = Some(*job_id),
            SchedulerNotification::AfterExecute
            | SchedulerNotification::ExecutionIgnored
            | SchedulerNotification::ExecutionFailed => self.current_job = None,
            SchedulerNotification::JobDeleted(_) => {}
        }
    }
}
