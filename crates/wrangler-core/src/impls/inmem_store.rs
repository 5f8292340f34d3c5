//! InMemoryStore - 開発用・テスト用の task / log ストア
//!
//! # 実装詳細
//! - BTreeMap<TaskId, TaskRecord> で id 順に行を保持（scan がそのまま cursor になる）
//! - ログは挿入順の連番付きで保持し、(timestamp, seq) で並べて返す
//! - 一つの Mutex で全体を守るので、各メソッドはそのまま一つのトランザクション
//! - `set_available` / `fail_next_insert` で障害を注入できる

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ArgsFingerprint, JobId, LogEntry, StoreError, TaskId, TaskRecord, TypeFingerprint,
};
use crate::ports::{LogStore, TaskStore};

#[derive(Default)]
struct State {
    tasks: BTreeMap<TaskId, TaskRecord>,
    logs: Vec<(u64, LogEntry)>,
    next_seq: u64,
    unavailable: bool,
    fail_next_insert: bool,
}

impl State {
    fn remove_tasks(&mut self, ids: &HashSet<TaskId>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|id, _| !ids.contains(id));
        self.logs.retain(|(_, entry)| !ids.contains(&entry.task_id));
        before - self.tasks.len()
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `is_available` report `available`. Other operations keep working.
    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    /// The next `insert` fails without touching any row.
    pub fn fail_next_insert(&self) {
        self.state().fail_next_insert = true;
    }

    /// Every row, ordered by id.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.state().tasks.values().cloned().collect()
    }

    pub fn log_count(&self) -> usize {
        self.state().logs.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn is_available(&self) -> Result<bool, StoreError> {
        Ok(!self.state().unavailable)
    }

    async fn insert(&self, record: TaskRecord, replacing: &[TaskId]) -> Result<(), StoreError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_insert) {
            return Err(StoreError::Injected("insert"));
        }
        let replacing: HashSet<TaskId> = replacing.iter().copied().collect();
        state.remove_tasks(&replacing);
        state.tasks.insert(record.id, record);
        Ok(())
    }

    async fn update_dispatch(
        &self,
        id: TaskId,
        job_id: JobId,
        current_try: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let record = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.redispatch(job_id, current_try, at);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.state().tasks.get(&id).cloned())
    }

    async fn find_by_job_id(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .state()
            .tasks
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn find_by_fingerprint(
        &self,
        type_fingerprint: &TypeFingerprint,
        args_fingerprint: &ArgsFingerprint,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .state()
            .tasks
            .values()
            .filter(|r| {
                &r.type_fingerprint == type_fingerprint && &r.args_fingerprint == args_fingerprint
            })
            .cloned()
            .collect())
    }

    async fn scan(
        &self,
        after: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state();
        let rows: Vec<TaskRecord> = match after {
            Some(after) => state
                .tasks
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .map(|(_, r)| r.clone())
                .take(limit)
                .collect(),
            None => state.tasks.values().take(limit).cloned().collect(),
        };
        Ok(rows)
    }

    async fn delete(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        let ids: HashSet<TaskId> = ids.iter().copied().collect();
        Ok(self.state().remove_tasks(&ids))
    }

    async fn delete_by_job_ids(&self, job_ids: &[JobId]) -> Result<usize, StoreError> {
        let job_ids: HashSet<JobId> = job_ids.iter().copied().collect();
        let mut state = self.state();
        let ids: HashSet<TaskId> = state
            .tasks
            .values()
            .filter(|r| job_ids.contains(&r.job_id))
            .map(|r| r.id)
            .collect();
        Ok(state.remove_tasks(&ids))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state().tasks.len())
    }
}

#[async_trait]
impl LogStore for InMemoryStore {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.logs.push((seq, entry));
        Ok(())
    }

    async fn for_task(&self, task_id: TaskId) -> Result<Vec<LogEntry>, StoreError> {
        let state = self.state();
        let mut entries: Vec<&(u64, LogEntry)> = state
            .logs
            .iter()
            .filter(|(_, e)| e.task_id == task_id)
            .collect();
        entries.sort_by_key(|(seq, e)| (e.timestamp, *seq));
        Ok(entries.into_iter().map(|(_, e)| e.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LogKind, LogLevel, SerializedPayload};
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn record(n: u64) -> TaskRecord {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let args = json!({ "n": n });
        TaskRecord {
            id: TaskId::from_ulid(Ulid::from_parts(n, 0)),
            job_id: JobId::from_ulid(Ulid::from_parts(1000 + n, 0)),
            type_fingerprint: TypeFingerprint::of("test.store", 1),
            args_fingerprint: ArgsFingerprint::of(&args),
            current_try: 0,
            payload: SerializedPayload {
                task_type: "test.store".into(),
                version: 1,
                args,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn log(task_id: TaskId, job_id: JobId, kind: LogKind, minute: u32) -> LogEntry {
        LogEntry {
            id: crate::domain::LogId::from_ulid(Ulid::new()),
            task_id,
            job_id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            level: LogLevel::Info,
            kind,
            message: kind.to_string(),
            context: json!({}),
        }
    }

    #[tokio::test]
    async fn insert_replaces_rows_and_their_logs_together() {
        let store = InMemoryStore::new();
        let old = record(1);
        store.insert(old.clone(), &[]).await.unwrap();
        store
            .append(log(old.id, old.job_id, LogKind::Created, 0))
            .await
            .unwrap();

        store.insert(record(2), &[old.id]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.log_count(), 0);
    }

    #[tokio::test]
    async fn injected_insert_failure_leaves_state_untouched() {
        let store = InMemoryStore::new();
        let old = record(1);
        store.insert(old.clone(), &[]).await.unwrap();

        store.fail_next_insert();
        let result = store.insert(record(2), &[old.id]).await;

        assert!(matches!(result, Err(StoreError::Injected(_))));
        assert_eq!(store.records(), vec![old]);
        store.insert(record(3), &[]).await.unwrap();
    }

    #[tokio::test]
    async fn scan_pages_by_id() {
        let store = InMemoryStore::new();
        for n in 1..=5 {
            store.insert(record(n), &[]).await.unwrap();
        }
        let first = store.scan(None, 2).await.unwrap();
        let second = store.scan(Some(first[1].id), 2).await.unwrap();
        let last = store.scan(Some(second[1].id), 2).await.unwrap();

        let ids: Vec<TaskId> = first.iter().chain(&second).chain(&last).map(|r| r.id).collect();
        let expected: Vec<TaskId> = (1..=5).map(|n| record(n).id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn logs_are_ordered_by_timestamp_then_insertion() {
        let store = InMemoryStore::new();
        let r = record(1);
        store.append(log(r.id, r.job_id, LogKind::Started, 5)).await.unwrap();
        store.append(log(r.id, r.job_id, LogKind::Created, 1)).await.unwrap();
        store.append(log(r.id, r.job_id, LogKind::Finished, 5)).await.unwrap();

        let kinds: Vec<LogKind> = store
            .for_task(r.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![LogKind::Created, LogKind::Started, LogKind::Finished]);
    }

    #[tokio::test]
    async fn delete_by_job_ids_cascades() {
        let store = InMemoryStore::new();
        let a = record(1);
        let b = record(2);
        store.insert(a.clone(), &[]).await.unwrap();
        store.insert(b.clone(), &[]).await.unwrap();
        store.append(log(a.id, a.job_id, LogKind::Created, 0)).await.unwrap();

        assert_eq!(store.delete_by_job_ids(&[a.job_id]).await.unwrap(), 1);
        assert_eq!(store.records(), vec![b]);
        assert_eq!(store.log_count(), 0);
    }
}
