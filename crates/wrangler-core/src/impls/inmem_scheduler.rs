//! InMemoryScheduler - 開発用・テスト用のジョブスケジューラ
//!
//! # 学習ポイント
//! - 外部スケジューラの振る舞い（pending → running → complete/failed）を最小限で再現
//! - 時刻は Clock から読むので、FixedClock を進めるだけで retry/backoff を検証できる
//! - `run_due` が worker の役割を担い、ExecutionContext への通知も行う
//!
//! Finished jobs stay visible until `purge_finished`, like a scheduler
//! with a retention window. `remove` simulates an out-of-band deletion and
//! queues a `JobDeleted` notification for the next `run_due`.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::app::{ExecutionContext, ProcessOutcome, Regulator};
use crate::domain::{JobId, JobStatus, RegulatorError, SchedulerError};
use crate::ports::{
    Clock, IdGenerator, Job, JobQuery, JobRequest, JobScheduler, SchedulerNotification,
    UlidGenerator,
};

struct Entry {
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct State {
    jobs: BTreeMap<JobId, Entry>,
    next_seq: u64,
    notifications: Vec<SchedulerNotification>,
    fail_next_schedule: bool,
}

/// Result of running one job.
#[derive(Debug)]
pub struct JobRun {
    pub job_id: JobId,
    pub task_type: String,
    pub result: Result<ProcessOutcome, RegulatorError>,
}

pub struct InMemoryScheduler {
    clock: Arc<dyn Clock>,
    ids: UlidGenerator<Arc<dyn Clock>>,
    state: Mutex<State>,
}

impl InMemoryScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            ids: UlidGenerator::new(clock.clone()),
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every job in scheduling order.
    pub fn jobs(&self) -> Vec<Job> {
        let state = self.state();
        let mut entries: Vec<&Entry> = state.jobs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    pub fn pending_jobs(&self) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|j| j.status == JobStatus::Pending)
            .collect()
    }

    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.state().jobs.get(&job_id).map(|e| e.job.clone())
    }

    /// Force a job into `status`. Returns `false` for an unknown job.
    pub fn mark(&self, job_id: JobId, status: JobStatus) -> bool {
        match self.state().jobs.get_mut(&job_id) {
            Some(entry) => {
                entry.job.status = status;
                true
            }
            None => false,
        }
    }

    /// The next `schedule` call is rejected.
    pub fn fail_next_schedule(&self) {
        self.state().fail_next_schedule = true;
    }

    /// Forget finished jobs without notifying anyone.
    pub fn purge_finished(&self) -> Vec<JobId> {
        let mut state = self.state();
        let finished: Vec<JobId> = state
            .jobs
            .values()
            .filter(|e| !e.job.status.is_live())
            .map(|e| e.job.id)
            .collect();
        for job_id in &finished {
            state.jobs.remove(job_id);
        }
        finished
    }

    /// Delete a job out-of-band; the engine hears about it on the next `run_due`.
    pub fn remove(&self, job_id: JobId) -> bool {
        let mut state = self.state();
        let removed = state.jobs.remove(&job_id).is_some();
        if removed {
            state
                .notifications
                .push(SchedulerNotification::JobDeleted(job_id));
        }
        removed
    }

    pub fn take_notifications(&self) -> Vec<SchedulerNotification> {
        std::mem::take(&mut self.state().notifications)
    }

    /// Run every job due at the clock's current time, in (run_at, priority,
    /// scheduling order). Jobs scheduled by the runs themselves wait for the
    /// next call.
    pub async fn run_due(&self, regulator: &Regulator) -> Vec<JobRun> {
        let mut runs = Vec::new();

        for notification in self.take_notifications() {
            let mut ctx = ExecutionContext::new();
            if let Err(e) = regulator.handle_notification(&mut ctx, &notification).await {
                warn!(error = %e, ?notification, "notification handling failed");
            }
        }

        let now = self.clock.now();
        let due: Vec<JobId> = {
            let state = self.state();
            let mut due: Vec<&Entry> = state
                .jobs
                .values()
                .filter(|e| e.job.status == JobStatus::Pending && e.job.request.run_at <= now)
                .collect();
            due.sort_by_key(|e| (e.job.request.run_at, e.job.request.priority, e.seq));
            due.into_iter().map(|e| e.job.id).collect()
        };

        for job_id in due {
            let Some(job) = self.claim(job_id) else {
                continue;
            };
            let mut ctx = ExecutionContext::new();
            let before = SchedulerNotification::BeforeExecute(job_id);
            if let Err(e) = regulator.handle_notification(&mut ctx, &before).await {
                warn!(error = %e, notification = ?before, "notification handling failed");
            }

            let result = regulator.execute(&ctx, &job).await;
            let (status, end) = match &result {
                Ok(_) => (JobStatus::Complete, SchedulerNotification::AfterExecute),
                Err(_) => (JobStatus::Failed, SchedulerNotification::ExecutionFailed),
            };
            self.mark(job_id, status);
            if let Err(e) = regulator.handle_notification(&mut ctx, &end).await {
                warn!(error = %e, notification = ?end, "notification handling failed");
            }
            debug!(%job_id, ?status, "job ran");

            runs.push(JobRun {
                job_id,
                task_type: job.request.task_type,
                result,
            });
        }
        runs
    }

    /// Pending → Running, unless the job was deleted or postponed meanwhile.
    fn claim(&self, job_id: JobId) -> Option<Job> {
        let now = self.clock.now();
        let mut state = self.state();
        let entry = state.jobs.get_mut(&job_id)?;
        if entry.job.status != JobStatus::Pending || entry.job.request.run_at > now {
            return None;
        }
        entry.job.status = JobStatus::Running;
        Some(entry.job.clone())
    }
}

#[async_trait]
impl JobScheduler for InMemoryScheduler {
    async fn find_pending(&self, query: &JobQuery) -> Result<Option<JobId>, SchedulerError> {
        Ok(self
            .state()
            .jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Pending && e.job.request.matches(query))
            .min_by_key(|e| e.seq)
            .map(|e| e.job.id))
    }

    async fn schedule(&self, request: JobRequest) -> Result<JobId, SchedulerError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_schedule) {
            return Err(SchedulerError::Rejected("injected failure".into()));
        }
        // Unique jobs conflict with pending ones only, so a running unique
        // job can schedule its own successor.
        if request.unique
            && state.jobs.values().any(|e| {
                e.job.status == JobStatus::Pending
                    && e.job.request.group == request.group
                    && e.job.request.task_type == request.task_type
            })
        {
            return Err(SchedulerError::UniqueConflict {
                group: request.group.to_string(),
                task_type: request.task_type,
            });
        }
        let id = self.ids.generate_job_id();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            id,
            Entry {
                seq,
                job: Job {
                    id,
                    request,
                    status: JobStatus::Pending,
                },
            },
        );
        Ok(id)
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>, SchedulerError> {
        Ok(self.state().jobs.get(&job_id).map(|e| e.job.status))
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, SchedulerError> {
        Ok(self.state().jobs.remove(&job_id).is_some())
    }

    async fn postpone(&self, job_id: JobId, run_at: DateTime<Utc>) -> Result<bool, SchedulerError> {
        match self.state().jobs.get_mut(&job_id) {
            Some(entry)
                if entry.job.status == JobStatus::Pending && entry.job.request.run_at < run_at =>
            {
                entry.job.request.run_at = run_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn existing(&self, job_ids: &[JobId]) -> Result<HashSet<JobId>, SchedulerError> {
        let state = self.state();
        Ok(job_ids
            .iter()
            .filter(|id| state.jobs.contains_key(*id))
            .copied()
            .collect())
    }
}
