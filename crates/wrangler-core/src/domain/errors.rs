//! Errors - エラー型と分類
//!
//! - `TaskError`: what a task's `process` reports (retryable / terminal / unclassified)
//! - `RegulatorError`: what the engine reports to its callers
//! - `StoreError` / `SchedulerError`: port failures

use thiserror::Error;

use super::fingerprint::{ArgsFingerprint, TypeFingerprint};
use super::ids::{JobId, TaskId};
use crate::typed::RegistryError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by `Task::process`.
///
/// A task only says whether its failure *is* retryable; whether it *will*
/// be retried is decided by the regulator from the retry budget.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Recoverable failure. Triggers the retry branch.
    #[error("{message}")]
    Retryable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Permanent failure (malformed request, permanent rejection, ...).
    #[error("{message} (not retryable)")]
    FailWithoutRetry {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Anything the task did not classify.
    #[error("unexpected error: {0}")]
    Unexpected(#[source] BoxError),
}

impl TaskError {
    pub fn retryable(message: impl Into<String>) -> Self {
        TaskError::Retryable {
            message: message.into(),
            source: None,
        }
    }

    pub fn retryable_from(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        TaskError::Retryable {
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn fail_without_retry(message: impl Into<String>) -> Self {
        TaskError::FailWithoutRetry {
            message: message.into(),
            source: None,
        }
    }

    pub fn unexpected(source: impl Into<BoxError>) -> Self {
        TaskError::Unexpected(source.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable { .. })
    }
}

/// Storage port failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("task record {0} not found")]
    NotFound(TaskId),

    #[error("payload serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("injected failure: {0}")]
    Injected(&'static str),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Scheduler port failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a unique job for {task_type} is already pending in group {group}")]
    UniqueConflict { group: String, task_type: String },

    #[error("scheduler rejected the job: {0}")]
    Rejected(String),

    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the regulator.
///
/// `is_fatal()` marks engine-invariant violations (deployment mismatch,
/// missing execution context, reclaimed row): the attempt cannot proceed
/// and nothing is logged against a task.
#[derive(Debug, Error)]
pub enum RegulatorError {
    #[error(
        "{live} live records already exist for type {type_fingerprint} args {args_fingerprint}"
    )]
    TaskAlreadyExists {
        type_fingerprint: TypeFingerprint,
        args_fingerprint: ArgsFingerprint,
        live: usize,
    },

    #[error("scheduling {task_type} failed: {source}")]
    SchedulingFailed {
        task_type: String,
        #[source]
        source: Box<RegulatorError>,
    },

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("task arguments cannot be serialized: {0}")]
    InvalidArguments(String),

    #[error("task type {0} cannot be resolved")]
    UnknownTaskType(String),

    #[error("no job is currently executing in this context")]
    MissingExecutionContext,

    #[error("no task record for {job_id}")]
    TaskRecordNotFound { job_id: JobId },

    #[error("{task_id} failed: {source}")]
    TaskFailed {
        task_id: TaskId,
        #[source]
        source: TaskError,
    },

    #[error("{task_id} raised an unclassified error: {source}")]
    Unclassified {
        task_id: TaskId,
        #[source]
        source: TaskError,
    },

    #[error("inline execution of {task_type} failed: {source}")]
    InlineExecutionFailed {
        task_type: String,
        #[source]
        source: TaskError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RegulatorError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RegulatorError::UnknownTaskType(_)
                | RegulatorError::MissingExecutionContext
                | RegulatorError::TaskRecordNotFound { .. }
        )
    }
}
