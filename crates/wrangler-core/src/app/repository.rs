//! TaskRepository - task rows reconciled against the scheduler
//!
//! `TaskStore` only knows rows. Whether a row is live depends on the state
//! of its job in the scheduler, so every rule that needs liveness lives
//! here:
//!
//! - save: collapse terminal duplicates, refuse a second live duplicate
//! - lookup: rebuild tasks through the registry

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{
    ArgsFingerprint, JobId, RegulatorError, StoreError, TaskId, TaskRecord, TypeFingerprint,
};
use crate::ports::{Clock, IdGenerator, JobScheduler, TaskStore};
use crate::typed::{TaskEnvelope, TaskRegistry};

#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<dyn JobScheduler>,
    registry: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskRepository {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<dyn JobScheduler>,
        registry: Arc<TaskRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            scheduler,
            registry,
            clock,
            ids,
        }
    }

    /// A store error while probing counts as unavailable.
    pub async fn is_available(&self) -> bool {
        match self.store.is_available().await {
            Ok(available) => available,
            Err(e) => {
                warn!(error = %e, "task store probe failed");
                false
            }
        }
    }

    /// Persist `envelope` against `job_id` and return its task id.
    ///
    /// An envelope that was persisted before keeps its row: only `job_id`
    /// and `current_try` move. A fresh envelope gets a new row, replacing
    /// any terminal rows with the same identity in the same transaction.
    pub async fn save(
        &self,
        envelope: &mut TaskEnvelope,
        job_id: JobId,
    ) -> Result<TaskId, RegulatorError> {
        let now = self.clock.now();

        if let Some(id) = envelope.id() {
            self.store
                .update_dispatch(id, job_id, envelope.current_try(), now)
                .await?;
            envelope.mark_persisted(id, job_id);
            return Ok(id);
        }

        let existing = self
            .store
            .find_by_fingerprint(envelope.type_fingerprint(), envelope.args_fingerprint())
            .await?;
        let mut stale = Vec::new();
        let mut live = 0;
        for record in &existing {
            if self.is_live(record).await? {
                live += 1;
            } else {
                stale.push(record.id);
            }
        }
        if live >= 2 {
            return Err(RegulatorError::TaskAlreadyExists {
                type_fingerprint: envelope.type_fingerprint().clone(),
                args_fingerprint: envelope.args_fingerprint().clone(),
                live,
            });
        }

        let record = TaskRecord {
            id: self.ids.generate_task_id(),
            job_id,
            type_fingerprint: envelope.type_fingerprint().clone(),
            args_fingerprint: envelope.args_fingerprint().clone(),
            current_try: envelope.current_try(),
            payload: envelope.payload().clone(),
            created_at: now,
            updated_at: now,
        };
        let id = record.id;
        self.store.insert(record, &stale).await?;
        if !stale.is_empty() {
            debug!(task_id = %id, collapsed = stale.len(), "replaced terminal duplicates");
        }
        envelope.mark_persisted(id, job_id);
        Ok(id)
    }

    /// The task executing under `job_id`, if its row matches the identity
    /// the scheduler reported.
    pub async fn get_by_job_id(
        &self,
        job_id: JobId,
        type_fingerprint: &TypeFingerprint,
        args_fingerprint: &ArgsFingerprint,
    ) -> Result<Option<TaskEnvelope>, RegulatorError> {
        let mut rows: Vec<TaskRecord> = self
            .store
            .find_by_job_id(job_id)
            .await?
            .into_iter()
            .filter(|r| {
                &r.type_fingerprint == type_fingerprint && &r.args_fingerprint == args_fingerprint
            })
            .collect();
        if rows.len() > 1 {
            warn!(%job_id, rows = rows.len(), "several task rows reference one job");
            rows.sort_by_key(|r| (r.updated_at, r.id));
        }
        match rows.pop() {
            Some(record) => self.registry.restore(&record).map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_by_args_fingerprint(
        &self,
        type_fingerprint: &TypeFingerprint,
        args_fingerprint: &ArgsFingerprint,
    ) -> Result<Vec<TaskEnvelope>, RegulatorError> {
        self.store
            .find_by_fingerprint(type_fingerprint, args_fingerprint)
            .await?
            .iter()
            .map(|record| self.registry.restore(record))
            .collect()
    }

    /// The row pointing at `job_id`, without decoding it.
    pub async fn find_by_job_id(&self, job_id: JobId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.store.find_by_job_id(job_id).await?.into_iter().next())
    }

    pub async fn get_record(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get(id).await
    }

    pub async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.store.delete(&[id]).await? > 0)
    }

    pub async fn delete_by_job_ids(&self, job_ids: &[JobId]) -> Result<usize, StoreError> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_by_job_ids(job_ids).await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.count().await
    }

    async fn is_live(&self, record: &TaskRecord) -> Result<bool, RegulatorError> {
        Ok(self
            .scheduler
            .status(record.job_id)
            .await?
            .is_some_and(|status| status.is_live()))
    }
}
