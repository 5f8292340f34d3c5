//! TaskStore port - task rows (source of truth for task identity)
//!
//! Raw row storage. Reconciliation against the scheduler lives in
//! `app::repository::TaskRepository`; this trait only guarantees that each
//! method is one atomic unit.
//!
//! # 設計原則
//! - `insert` は「古い行の削除 + 新しい行の挿入」を同一トランザクションで行う
//! - 行の削除はログも削除する（cascade）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ArgsFingerprint, JobId, StoreError, TaskId, TaskRecord, TypeFingerprint};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// `false` when the backing storage is not usable (e.g. schema missing).
    async fn is_available(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    /// Delete `replacing` (with their logs) and insert `record`, atomically.
    async fn insert(&self, record: TaskRecord, replacing: &[TaskId]) -> Result<(), StoreError>;

    /// Point an existing row at a new job.
    async fn update_dispatch(
        &self,
        id: TaskId,
        job_id: JobId,
        current_try: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Normally zero or one row; more is a detectable anomaly.
    async fn find_by_job_id(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError>;

    async fn find_by_fingerprint(
        &self,
        type_fingerprint: &TypeFingerprint,
        args_fingerprint: &ArgsFingerprint,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Rows ordered by id, strictly after `after`, at most `limit`.
    async fn scan(&self, after: Option<TaskId>, limit: usize)
    -> Result<Vec<TaskRecord>, StoreError>;

    /// Delete rows and their logs. Returns the number of rows removed.
    async fn delete(&self, ids: &[TaskId]) -> Result<usize, StoreError>;

    /// Delete every row referencing one of `job_ids`, with their logs.
    async fn delete_by_job_ids(&self, job_ids: &[JobId]) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
