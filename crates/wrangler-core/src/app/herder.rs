//! Herder - 孤児レコードの回収
//!
//! A task row is an orphan once the scheduler no longer knows its job
//! (purged, deleted out-of-band, lost). `herd()` sweeps the store in id
//! order and deletes orphans in batches; `HerdTask` runs the sweep as an
//! ordinary task that re-dispatches itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::regulator::{DispatchOutcome, Regulator};
use crate::domain::{JobId, RegulatorError, RegulatorEvent, TaskError, TaskId};
use crate::ports::{EventSink, JobScheduler, TaskStore};
use crate::typed::{Task, TaskContext, TaskEnvelope};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HerdReport {
    pub scanned: usize,
    pub deleted: usize,
    pub batches: usize,
}

pub struct Herder {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<dyn JobScheduler>,
    events: Arc<dyn EventSink>,
    batch_size: usize,
    interval: Duration,
}

impl Herder {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<dyn JobScheduler>,
        events: Arc<dyn EventSink>,
        batch_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            events,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delete every orphaned row (and its logs), one transaction per batch.
    ///
    /// Emits exactly one `HerdingProcessed` when the sweep completes.
    pub async fn herd(&self) -> Result<HerdReport, RegulatorError> {
        let mut report = HerdReport::default();
        let mut cursor: Option<TaskId> = None;

        loop {
            let orphans = self.select_orphans(&mut cursor, &mut report).await?;
            if orphans.is_empty() {
                break;
            }
            let deleted = self.store.delete(&orphans).await?;
            debug!(selected = orphans.len(), deleted, "herded orphan batch");
            report.deleted += deleted;
            report.batches += 1;
        }

        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            batches = report.batches,
            "herding processed"
        );
        self.events.emit(&RegulatorEvent::HerdingProcessed {
            deleted: report.deleted,
        });
        Ok(report)
    }

    /// Up to `batch_size` orphan ids past `cursor`. The cursor advances per
    /// inspected row, so rows left unexamined in a page are read again.
    async fn select_orphans(
        &self,
        cursor: &mut Option<TaskId>,
        report: &mut HerdReport,
    ) -> Result<Vec<TaskId>, RegulatorError> {
        let mut orphans = Vec::with_capacity(self.batch_size);
        while orphans.len() < self.batch_size {
            let page = self.store.scan(*cursor, self.batch_size).await?;
            if page.is_empty() {
                break;
            }
            let job_ids: Vec<JobId> = page.iter().map(|r| r.job_id).collect();
            let existing = self.scheduler.existing(&job_ids).await?;
            for record in page {
                *cursor = Some(record.id);
                report.scanned += 1;
                if !existing.contains(&record.job_id) {
                    orphans.push(record.id);
                    if orphans.len() == self.batch_size {
                        break;
                    }
                }
            }
        }
        Ok(orphans)
    }

    /// Dispatch the first sweep. A no-op when one is already pending.
    pub async fn ensure_scheduled(regulator: &Regulator) -> Result<DispatchOutcome, RegulatorError> {
        regulator
            .dispatch(TaskEnvelope::new(HerdTask::default())?, Duration::ZERO)
            .await
    }
}

/// Self-rescheduling sweep task.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct HerdTask {}

#[async_trait]
impl Task for HerdTask {
    const TYPE: &'static str = "wrangler.herd.v1";

    async fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let regulator = ctx.regulator();
        let herder = regulator.herder();
        let swept = herder.herd().await;

        // Inline runs have no row and no job to hand the next sweep to.
        // Otherwise the next sweep is scheduled even when this one failed.
        if ctx.task_id().is_some() {
            let scheduled = match TaskEnvelope::new(HerdTask::default()) {
                Ok(next) => regulator.dispatch(next, herder.interval()).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = scheduled {
                if swept.is_ok() {
                    return Err(TaskError::unexpected(e));
                }
                warn!(error = %e, "next herd sweep could not be scheduled");
            }
        }
        swept.map(|_| ()).map_err(TaskError::unexpected)
    }

    fn is_unique(&self) -> bool {
        true
    }
}
