//! TaskEnvelope - a task instance plus its identity and persistence state.

use std::fmt;

use super::erased::{DynTask, TypedTask};
use super::task::Task;
use crate::domain::{
    ArgsFingerprint, JobId, RegulatorError, SerializedPayload, TaskId, TaskRecord,
    TypeFingerprint,
};

/// What the regulator dispatches and executes.
///
/// A fresh envelope has no `id`; it gets one on its first successful
/// persist and keeps it across retries.
pub struct TaskEnvelope {
    task: Box<dyn DynTask>,
    payload: SerializedPayload,
    type_fingerprint: TypeFingerprint,
    args_fingerprint: ArgsFingerprint,
    id: Option<TaskId>,
    job_id: Option<JobId>,
    current_try: u32,
}

impl TaskEnvelope {
    /// Wrap a task, serializing its arguments eagerly.
    ///
    /// Arguments that cannot be represented as JSON are rejected here: a
    /// task without a deterministic identity cannot be deduplicated.
    pub fn new<T: Task>(task: T) -> Result<Self, RegulatorError> {
        let args = serde_json::to_value(&task)
            .map_err(|e| RegulatorError::InvalidArguments(format!("{}: {e}", T::TYPE)))?;
        let args_fingerprint = ArgsFingerprint::of(&args);
        Ok(Self {
            task: Box::new(TypedTask::new(task)),
            payload: SerializedPayload {
                task_type: T::TYPE.to_string(),
                version: T::VERSION,
                args,
            },
            type_fingerprint: TypeFingerprint::of(T::TYPE, T::VERSION),
            args_fingerprint,
            id: None,
            job_id: None,
            current_try: 0,
        })
    }

    /// Rebuild an envelope from a stored row and its decoded task.
    pub(crate) fn restore(task: Box<dyn DynTask>, record: &TaskRecord) -> Self {
        Self {
            task,
            payload: record.payload.clone(),
            type_fingerprint: record.type_fingerprint.clone(),
            args_fingerprint: record.args_fingerprint.clone(),
            id: Some(record.id),
            job_id: Some(record.job_id),
            current_try: record.current_try,
        }
    }

    pub fn task(&self) -> &dyn DynTask {
        self.task.as_ref()
    }

    pub fn task_type(&self) -> &str {
        &self.payload.task_type
    }

    pub fn payload(&self) -> &SerializedPayload {
        &self.payload
    }

    pub fn type_fingerprint(&self) -> &TypeFingerprint {
        &self.type_fingerprint
    }

    pub fn args_fingerprint(&self) -> &ArgsFingerprint {
        &self.args_fingerprint
    }

    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn current_try(&self) -> u32 {
        self.current_try
    }

    pub(crate) fn set_current_try(&mut self, current_try: u32) {
        self.current_try = current_try;
    }

    pub(crate) fn mark_persisted(&mut self, id: TaskId, job_id: JobId) {
        self.id = Some(id);
        self.job_id = Some(job_id);
    }
}

impl fmt::Debug for TaskEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEnvelope")
            .field("task_type", &self.payload.task_type)
            .field("args_fingerprint", &self.args_fingerprint)
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .field("current_try", &self.current_try)
            .finish()
    }
}
