//! JobScheduler port - 外部ジョブスケジューラ
//!
//! The scheduler is an external collaborator: it stores opaque jobs, runs
//! them at or after their timestamp and reports pending/running/finished
//! state. The engine never implements it; `impls::InMemoryScheduler` is the
//! reference implementation used in tests.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ArgsFingerprint, Group, JobId, JobStatus, Priority, SchedulerError, TypeFingerprint,
};

/// Identifies the "same task" on the scheduler side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQuery {
    pub group: Group,
    pub task_type: String,
    pub args_fingerprint: ArgsFingerprint,
}

/// Everything the scheduler needs to run one task instance later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub run_at: DateTime<Utc>,
    pub task_type: String,
    pub type_fingerprint: TypeFingerprint,
    pub args_fingerprint: ArgsFingerprint,
    pub group: Group,
    pub unique: bool,
    pub priority: Priority,
}

impl JobRequest {
    pub fn matches(&self, query: &JobQuery) -> bool {
        self.group == query.group
            && self.task_type == query.task_type
            && self.args_fingerprint == query.args_fingerprint
    }
}

/// A job as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
    pub status: JobStatus,
}

/// Notifications the scheduler's worker loop delivers to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerNotification {
    BeforeExecute(JobId),
    AfterExecute,
    ExecutionIgnored,
    ExecutionFailed,
    JobDeleted(JobId),
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// The pending job filed for this group + task identity, if any.
    async fn find_pending(&self, query: &JobQuery) -> Result<Option<JobId>, SchedulerError>;

    async fn has_pending(&self, query: &JobQuery) -> Result<bool, SchedulerError> {
        Ok(self.find_pending(query).await?.is_some())
    }

    /// File a job; returns its id.
    async fn schedule(&self, request: JobRequest) -> Result<JobId, SchedulerError>;

    /// `None` when the scheduler has no such job (never existed or purged).
    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, SchedulerError>;

    async fn is_pending(&self, job_id: JobId) -> Result<bool, SchedulerError> {
        Ok(matches!(self.status(job_id).await?, Some(JobStatus::Pending)))
    }

    /// Remove a job. Returns `false` if it did not exist.
    async fn delete(&self, job_id: JobId) -> Result<bool, SchedulerError>;

    /// Push a pending job back to `run_at`. Never moves a job earlier.
    ///
    /// Returns `false` if the job is not pending or already runs at or after
    /// `run_at`.
    async fn postpone(&self, job_id: JobId, run_at: DateTime<Utc>) -> Result<bool, SchedulerError>;

    /// The subset of `job_ids` the scheduler still knows about.
    async fn existing(&self, job_ids: &[JobId]) -> Result<HashSet<JobId>, SchedulerError>;
}
