//! Task record: the persisted row behind a dispatched task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fingerprint::{ArgsFingerprint, TypeFingerprint};
use super::ids::{JobId, TaskId};

/// Type name + version + constructor arguments, enough to rebuild the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedPayload {
    pub task_type: String,
    pub version: u32,
    pub args: serde_json::Value,
}

/// Persisted task row.
///
/// - `id` is assigned on first persist and never changes.
/// - `job_id` points at the scheduler job of the current instance.
/// - `current_try` is only written by the regulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub job_id: JobId,
    pub type_fingerprint: TypeFingerprint,
    pub args_fingerprint: ArgsFingerprint,
    pub current_try: u32,
    pub payload: SerializedPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Point the record at a newly scheduled job.
    pub fn redispatch(&mut self, job_id: JobId, current_try: u32, at: DateTime<Utc>) {
        self.job_id = job_id;
        self.current_try = current_try;
        self.updated_at = at;
    }
}
