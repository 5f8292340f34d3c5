//! SqliteStore - SQLite に task 行とログを保存するストア
//!
//! - task 行の削除は `ON DELETE CASCADE` でログも消す
//! - 複数行にまたがる変更（置き換え insert, バッチ削除）は一つのトランザクション
//! - 時刻はミリ秒の整数、ID は ULID 文字列（文字列順 = 時刻順）で保存
//! - ログは AUTOINCREMENT の seq を持ち、(timestamp, seq) で並べる

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::app::TableNames;
use crate::domain::{
    ArgsFingerprint, JobId, LogEntry, LogId, StoreError, TaskId, TaskRecord, TypeFingerprint,
};
use crate::ports::{LogStore, TaskStore};
use crate::typed::PayloadCodec;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    names: TableNames,
}

impl SqliteStore {
    /// Wrap an open connection. The schema is not touched; call
    /// [`SqliteStore::migrate`] or the store reports itself unavailable.
    pub fn new(conn: Connection, names: TableNames) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
            names,
        })
    }

    pub fn open(path: &str, names: TableNames) -> Result<Self, StoreError> {
        let store = Self::new(Connection::open(path)?, names)?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory(names: TableNames) -> Result<Self, StoreError> {
        let store = Self::new(Connection::open_in_memory()?, names)?;
        store.migrate()?;
        Ok(store)
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    /// Create tables and indexes if they do not exist yet.
    pub fn migrate(&self) -> Result<(), StoreError> {
        let n = &self.names;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {tasks} (
                id               TEXT PRIMARY KEY,
                job_id           TEXT NOT NULL,
                type_fingerprint TEXT NOT NULL,
                args_fingerprint TEXT NOT NULL,
                current_try      INTEGER NOT NULL DEFAULT 0,
                payload          TEXT NOT NULL,
                created_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {job_idx} ON {tasks} (job_id);
            CREATE INDEX IF NOT EXISTS {fp_idx} ON {tasks} (type_fingerprint, args_fingerprint);
            CREATE TABLE IF NOT EXISTS {logs} (
                seq       INTEGER PRIMARY KEY AUTOINCREMENT,
                id        TEXT NOT NULL UNIQUE,
                task_id   TEXT NOT NULL REFERENCES {tasks} (id) ON DELETE CASCADE,
                job_id    TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                level     TEXT NOT NULL,
                kind      TEXT NOT NULL,
                message   TEXT NOT NULL,
                context   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {log_idx} ON {logs} (task_id, timestamp, seq);",
            tasks = n.tasks(),
            logs = n.task_logs(),
            job_idx = n.tasks_job_id_idx(),
            fp_idx = n.tasks_fingerprint_idx(),
            log_idx = n.task_logs_task_id_idx(),
        );
        self.conn()?.execute_batch(&sql)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))
    }

    fn select_tasks(&self) -> String {
        format!(
            "SELECT id, job_id, type_fingerprint, args_fingerprint, current_try, payload, \
             created_at, updated_at FROM {}",
            self.names.tasks()
        )
    }

    fn query_tasks(
        &self,
        conn: &Connection,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let sql = format!("{} {clause}", self.select_tasks());
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params, RawTask::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawTask::into_record).collect()
    }
}

struct RawTask {
    id: String,
    job_id: String,
    type_fingerprint: String,
    args_fingerprint: String,
    current_try: i64,
    payload: String,
    created_at: i64,
    updated_at: i64,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            type_fingerprint: row.get(2)?,
            args_fingerprint: row.get(3)?,
            current_try: row.get(4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord, StoreError> {
        Ok(TaskRecord {
            id: parse_id(&self.id)?,
            job_id: parse_id(&self.job_id)?,
            type_fingerprint: TypeFingerprint::from_raw(self.type_fingerprint),
            args_fingerprint: ArgsFingerprint::from_raw(self.args_fingerprint),
            current_try: u32::try_from(self.current_try)
                .map_err(|_| StoreError::Corrupt(format!("current_try {}", self.current_try)))?,
            payload: PayloadCodec::decode(&self.payload)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

fn parse_id<T: crate::domain::ids::IdMarker>(
    raw: &str,
) -> Result<crate::domain::ids::Id<T>, StoreError> {
    crate::domain::ids::Id::parse(raw).map_err(|e| StoreError::Corrupt(format!("id {raw:?}: {e}")))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn is_available(&self) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2)",
            params![self.names.tasks(), self.names.task_logs()],
            |row| row.get(0),
        )?;
        Ok(tables == 2)
    }

    async fn insert(&self, record: TaskRecord, replacing: &[TaskId]) -> Result<(), StoreError> {
        let payload =
            PayloadCodec::encode(&record.payload).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut delete = tx.prepare(&format!("DELETE FROM {} WHERE id = ?1", self.names.tasks()))?;
            for id in replacing {
                delete.execute(params![id.to_storage()])?;
            }
        }
        tx.execute(
            &format!(
                "INSERT INTO {} (id, job_id, type_fingerprint, args_fingerprint, current_try, \
                 payload, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                self.names.tasks()
            ),
            params![
                record.id.to_storage(),
                record.job_id.to_storage(),
                record.type_fingerprint.as_str(),
                record.args_fingerprint.as_str(),
                i64::from(record.current_try),
                payload,
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn update_dispatch(
        &self,
        id: TaskId,
        job_id: JobId,
        current_try: u32,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.conn()?.execute(
            &format!(
                "UPDATE {} SET job_id = ?2, current_try = ?3, updated_at = ?4 WHERE id = ?1",
                self.names.tasks()
            ),
            params![
                id.to_storage(),
                job_id.to_storage(),
                i64::from(current_try),
                at.timestamp_millis()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE id = ?1", self.select_tasks());
        let raw = conn
            .query_row(&sql, params![id.to_storage()], RawTask::from_row)
            .optional()?;
        raw.map(RawTask::into_record).transpose()
    }

    async fn find_by_job_id(&self, job_id: JobId) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn()?;
        self.query_tasks(&conn, "WHERE job_id = ?1 ORDER BY id", params![job_id.to_storage()])
    }

    async fn find_by_fingerprint(
        &self,
        type_fingerprint: &TypeFingerprint,
        args_fingerprint: &ArgsFingerprint,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn()?;
        self.query_tasks(
            &conn,
            "WHERE type_fingerprint = ?1 AND args_fingerprint = ?2 ORDER BY id",
            params![type_fingerprint.as_str(), args_fingerprint.as_str()],
        )
    }

    async fn scan(
        &self,
        after: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        match after {
            Some(after) => self.query_tasks(
                &conn,
                "WHERE id > ?1 ORDER BY id LIMIT ?2",
                params![after.to_storage(), limit],
            ),
            None => self.query_tasks(&conn, "ORDER BY id LIMIT ?1", params![limit]),
        }
    }

    async fn delete(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE id = ?1", self.names.tasks()))?;
            for id in ids {
                deleted += stmt.execute(params![id.to_storage()])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    async fn delete_by_job_ids(&self, job_ids: &[JobId]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt =
                tx.prepare(&format!("DELETE FROM {} WHERE job_id = ?1", self.names.tasks()))?;
            for job_id in job_ids {
                deleted += stmt.execute(params![job_id.to_storage()])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self.conn()?.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.names.tasks()),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        let context = serde_json::to_string(&entry.context)?;
        self.conn()?.execute(
            &format!(
                "INSERT INTO {} (id, task_id, job_id, timestamp, level, kind, message, context) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                self.names.task_logs()
            ),
            params![
                entry.id.to_storage(),
                entry.task_id.to_storage(),
                entry.job_id.to_storage(),
                entry.timestamp.timestamp_millis(),
                entry.level.as_str(),
                entry.kind.as_str(),
                entry.message,
                context,
            ],
        )?;
        Ok(())
    }

    async fn for_task(&self, task_id: TaskId) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, task_id, job_id, timestamp, level, kind, message, context \
             FROM {} WHERE task_id = ?1 ORDER BY timestamp, seq",
            self.names.task_logs()
        ))?;
        let rows = stmt
            .query_map(params![task_id.to_storage()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, task_id, job_id, timestamp, level, kind, message, context)| {
                Ok(LogEntry {
                    id: parse_id::<crate::domain::ids::Log>(&id)?,
                    task_id: parse_id(&task_id)?,
                    job_id: parse_id(&job_id)?,
                    timestamp: from_millis(timestamp)?,
                    level: level.parse().map_err(StoreError::Corrupt)?,
                    kind: kind.parse().map_err(StoreError::Corrupt)?,
                    message,
                    context: serde_json::from_str(&context)?,
                })
            })
            .collect()
    }
}
