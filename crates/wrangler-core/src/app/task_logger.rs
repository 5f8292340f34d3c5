//! TaskLogger - ライフサイクルログの書き込み
//!
//! Persists one `LogEntry` per transition and mirrors it to `tracing`.
//! Timestamps are clamped so a task's entries never go backwards, even if
//! the clock does.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{JobId, LogEntry, LogKind, LogLevel, StoreError, TaskId};
use crate::ports::{Clock, IdGenerator, LogStore};

#[derive(Clone)]
pub struct TaskLogger {
    store: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskLogger {
    pub fn new(store: Arc<dyn LogStore>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    pub async fn write(
        &self,
        task_id: TaskId,
        job_id: JobId,
        kind: LogKind,
        level: LogLevel,
        message: impl Into<String>,
        context: Value,
    ) -> Result<LogEntry, StoreError> {
        let mut timestamp = self.clock.now();
        if let Some(last) = self.store.last_for_task(task_id).await?
            && last.timestamp > timestamp
        {
            timestamp = last.timestamp;
        }
        let context = match context {
            Value::Object(_) => context,
            Value::Null => Value::Object(Default::default()),
            other => serde_json::json!({ "value": other }),
        };
        let entry = LogEntry {
            id: self.ids.generate_log_id(),
            task_id,
            job_id,
            timestamp,
            level,
            kind,
            message: message.into(),
            context,
        };
        mirror(&entry);
        self.store.append(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn for_task(&self, task_id: TaskId) -> Result<Vec<LogEntry>, StoreError> {
        self.store.for_task(task_id).await
    }
}

fn mirror(entry: &LogEntry) {
    let task_id = entry.task_id;
    let job_id = entry.job_id;
    let kind = entry.kind.as_str();
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
            tracing::error!(%task_id, %job_id, kind, context = %entry.context, "{message}")
        }
        LogLevel::Warning => {
            tracing::warn!(%task_id, %job_id, kind, context = %entry.context, "{message}")
        }
        LogLevel::Notice | LogLevel::Info => {
            tracing::info!(%task_id, %job_id, kind, context = %entry.context, "{message}")
        }
        LogLevel::Debug => {
            tracing::debug!(%task_id, %job_id, kind, context = %entry.context, "{message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    fn logger() -> (TaskLogger, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let store = Arc::new(InMemoryStore::new());
        let logger = TaskLogger::new(
            store,
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
        );
        (logger, clock)
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let (logger, clock) = logger();
        let task_id = TaskId::from_ulid(Ulid::new());
        let job_id = JobId::from_ulid(Ulid::new());

        let first = logger
            .write(task_id, job_id, LogKind::Created, LogLevel::Info, "created", json!({}))
            .await
            .unwrap();
        clock.set(first.timestamp - chrono::Duration::minutes(5));
        let second = logger
            .write(task_id, job_id, LogKind::Started, LogLevel::Info, "started", Value::Null)
            .await
            .unwrap();

        assert_eq!(second.timestamp, first.timestamp);
        let kinds: Vec<LogKind> = logger
            .for_task(task_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![LogKind::Created, LogKind::Started]);
    }

    #[tokio::test]
    async fn non_object_context_is_wrapped() {
        let (logger, _) = logger();
        let entry = logger
            .write(
                TaskId::from_ulid(Ulid::new()),
                JobId::from_ulid(Ulid::new()),
                LogKind::Failed,
                LogLevel::Error,
                "boom",
                json!(42),
            )
            .await
            .unwrap();
        assert_eq!(entry.context, json!({ "value": 42 }));
    }
}
