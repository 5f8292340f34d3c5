//! LogStore port - append-only lifecycle logs

use async_trait::async_trait;

use crate::domain::{LogEntry, StoreError, TaskId};

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError>;

    /// Entries for one task, ordered by (timestamp, insertion order).
    async fn for_task(&self, task_id: TaskId) -> Result<Vec<LogEntry>, StoreError>;

    async fn last_for_task(&self, task_id: TaskId) -> Result<Option<LogEntry>, StoreError> {
        Ok(self.for_task(task_id).await?.pop())
    }
}
