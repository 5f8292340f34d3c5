//! Orphan reclamation: the periodic sweep and reactive job deletion.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rstest::rstest;

use common::{Greet, Harness, start};
use wrangler_core::app::{
    DispatchOutcome, HerdReport, HerdTask, Herder, RegulatorBuilder, RegulatorConfig,
};
use wrangler_core::domain::{JobId, JobStatus, RegulatorError, RegulatorEvent, SchedulerError};
use wrangler_core::impls::{InMemoryScheduler, InMemoryStore, RecordingEventSink};
use wrangler_core::ports::{FixedClock, Job, JobQuery, JobRequest, JobScheduler};
use wrangler_core::typed::Task;

/// Dispatch and finish `n` tasks, then let the scheduler forget their jobs.
async fn orphans(h: &Harness, n: usize) {
    for i in 0..n {
        h.regulator
            .submit(Greet::new(&format!("orphan-{i}")))
            .await
            .unwrap();
    }
    assert_eq!(h.run_due().await.len(), n);
    assert_eq!(h.scheduler.purge_finished().len(), n);
}

#[tokio::test]
async fn herd_deletes_orphans_and_their_logs() {
    let h = Harness::new();
    orphans(&h, 3).await;
    h.advance(1);
    let live = h
        .regulator
        .submit(Greet::new("live"))
        .await
        .unwrap()
        .task_id()
        .unwrap();
    h.events.clear();

    let report = h.regulator.herder().herd().await.unwrap();

    assert_eq!(report.deleted, 3);
    assert_eq!(report.scanned, 4);
    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, live);
    // Only the live task's `created` entry is left.
    assert_eq!(h.store.log_count(), 1);
    assert_eq!(
        h.events.events(),
        vec![RegulatorEvent::HerdingProcessed { deleted: 3 }]
    );
}

#[rstest]
#[case(1, 5, 5)]
#[case(2, 5, 3)]
#[case(50, 5, 1)]
#[case(2, 0, 0)]
#[tokio::test]
async fn herd_deletes_in_batches(
    #[case] herd_batch_size: usize,
    #[case] orphan_count: usize,
    #[case] batches: usize,
) {
    let h = Harness::with_config(RegulatorConfig {
        herd_batch_size,
        ..RegulatorConfig::default()
    });
    orphans(&h, orphan_count).await;

    let report = h.regulator.herder().herd().await.unwrap();

    assert_eq!(
        report,
        HerdReport {
            scanned: orphan_count,
            deleted: orphan_count,
            batches,
        }
    );
    assert_eq!(h.store.records().len(), 0);
    assert_eq!(h.events.names().iter().filter(|n| **n == "herding_processed").count(), 1);
}

#[tokio::test]
async fn herd_task_reschedules_itself() {
    let h = Harness::new();
    let first = Herder::ensure_scheduled(&h.regulator).await.unwrap();
    let again = Herder::ensure_scheduled(&h.regulator).await.unwrap();
    assert!(matches!(first, DispatchOutcome::Created { .. }));
    assert!(matches!(again, DispatchOutcome::AlreadyScheduled { .. }));

    let runs = h.run_due().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].task_type, HerdTask::TYPE);
    assert!(runs[0].result.is_ok());

    let pending = h.scheduler.pending_jobs();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.task_type, HerdTask::TYPE);
    assert_eq!(pending[0].request.run_at, h.now() + ChronoDuration::hours(1));

    h.clock.set(pending[0].request.run_at);
    assert_eq!(h.run_due().await.len(), 1);
    assert_eq!(h.scheduler.pending_jobs().len(), 1);
    // The row of the first sweep was terminal and got replaced.
    assert_eq!(h.store.records().len(), 2);
    assert_eq!(h.events.names().iter().filter(|n| **n == "herding_processed").count(), 2);
}

#[tokio::test]
async fn herd_sweep_reclaims_orphans_left_by_purged_jobs() {
    let h = Harness::new();
    orphans(&h, 2).await;
    Herder::ensure_scheduled(&h.regulator).await.unwrap();

    h.run_due().await;

    let records = h.store.records();
    assert!(
        records
            .iter()
            .all(|r| r.payload.task_type == HerdTask::TYPE)
    );
    assert!(h.events.events().contains(&RegulatorEvent::HerdingProcessed { deleted: 2 }));
}

#[tokio::test]
async fn deleted_job_removes_its_row() {
    let h = Harness::new();
    let outcome = h.regulator.submit(Greet::new("doomed")).await.unwrap();
    let kept = h.regulator.submit(Greet::new("kept")).await.unwrap();

    assert!(h.scheduler.remove(outcome.job_id().unwrap()));
    h.run_due().await;

    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(Some(records[0].id), kept.task_id());
    assert!(
        h.regulator
            .retrieve_logs(outcome.task_id().unwrap())
            .await
            .unwrap()
            .is_empty()
    );
}

/// Delegates to an `InMemoryScheduler` but fails the first `existing` lookup.
struct FlakyLookup {
    inner: Arc<InMemoryScheduler>,
    fail_existing: AtomicBool,
}

#[async_trait]
impl JobScheduler for FlakyLookup {
    async fn find_pending(&self, query: &JobQuery) -> Result<Option<JobId>, SchedulerError> {
        self.inner.find_pending(query).await
    }

    async fn schedule(&self, request: JobRequest) -> Result<JobId, SchedulerError> {
        self.inner.schedule(request).await
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, SchedulerError> {
        self.inner.status(job_id).await
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, SchedulerError> {
        self.inner.delete(job_id).await
    }

    async fn postpone(&self, job_id: JobId, run_at: DateTime<Utc>) -> Result<bool, SchedulerError> {
        self.inner.postpone(job_id, run_at).await
    }

    async fn existing(&self, job_ids: &[JobId]) -> Result<HashSet<JobId>, SchedulerError> {
        if self.fail_existing.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::Unavailable("lookup timed out".into()));
        }
        self.inner.existing(job_ids).await
    }
}

fn herd_jobs(scheduler: &InMemoryScheduler) -> Vec<Job> {
    scheduler
        .pending_jobs()
        .into_iter()
        .filter(|job| job.request.task_type == HerdTask::TYPE)
        .collect()
}

#[tokio::test]
async fn failed_sweep_still_schedules_the_next_one() {
    let clock = Arc::new(FixedClock::new(start()));
    let inner = Arc::new(InMemoryScheduler::new(clock.clone()));
    let events = Arc::new(RecordingEventSink::new());
    let regulator = RegulatorBuilder::new()
        .with_clock(clock.clone())
        .with_store(Arc::new(InMemoryStore::new()))
        .with_scheduler(Arc::new(FlakyLookup {
            inner: inner.clone(),
            fail_existing: AtomicBool::new(true),
        }))
        .with_event_sink(events.clone())
        .build()
        .unwrap();
    Herder::ensure_scheduled(&regulator).await.unwrap();

    let runs = inner.run_due(&regulator).await;

    assert!(matches!(runs[0].result, Err(RegulatorError::Unclassified { .. })));
    assert!(!events.names().contains(&"herding_processed"));
    let next = herd_jobs(&inner);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].request.run_at, start() + ChronoDuration::hours(1));

    clock.set(next[0].request.run_at);
    let runs = inner.run_due(&regulator).await;

    assert!(runs[0].result.is_ok());
    assert!(events.names().contains(&"herding_processed"));
    assert_eq!(herd_jobs(&inner).len(), 1);
}
