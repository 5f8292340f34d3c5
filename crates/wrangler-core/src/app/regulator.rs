//! Regulator - dispatch と実行の調停
//!
//! # Dispatch
//! 1. store unavailable → run inline, persist nothing
//! 2. pending job with the same identity → coalesce (optionally debounce)
//! 3. schedule → persist; a failed persist deletes the job again
//! 4. first dispatch only → `created` log + `TaskCreated`
//!
//! # Execution
//! `process_task` resolves the row for the job in the `ExecutionContext`,
//! runs the task and decides finish / retry / fail. Every transition is
//! logged before anything is returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use super::config::RegulatorConfig;
use super::context::ExecutionContext;
use super::herder::Herder;
use super::repository::TaskRepository;
use super::task_logger::TaskLogger;
use crate::domain::{
    ArgsFingerprint, JobId, JobStatus, LogEntry, LogKind, LogLevel, RegulatorError,
    RegulatorEvent, StoreError, TaskError, TaskId, TaskState,
};
use crate::ports::clock::offset;
use crate::ports::{Clock, EventSink, Job, JobQuery, JobRequest, JobScheduler, SchedulerNotification};
use crate::typed::{Task, TaskContext, TaskEnvelope, TaskRegistry};

/// What `dispatch` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// First dispatch: new row, new job.
    Created {
        task_id: TaskId,
        job_id: JobId,
        run_at: DateTime<Utc>,
    },
    /// An already persisted task moved to a new job (retry).
    Rescheduled {
        task_id: TaskId,
        job_id: JobId,
        run_at: DateTime<Utc>,
    },
    /// Coalesced into a pending job. `task_id` is `None` if the pending job
    /// has no row yet.
    AlreadyScheduled {
        task_id: Option<TaskId>,
        job_id: JobId,
        postponed_to: Option<DateTime<Utc>>,
    },
    /// The store was unavailable and the task already ran.
    RanInline,
}

impl DispatchOutcome {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            DispatchOutcome::Created { task_id, .. }
            | DispatchOutcome::Rescheduled { task_id, .. } => Some(*task_id),
            DispatchOutcome::AlreadyScheduled { task_id, .. } => *task_id,
            DispatchOutcome::RanInline => None,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            DispatchOutcome::Created { job_id, .. }
            | DispatchOutcome::Rescheduled { job_id, .. }
            | DispatchOutcome::AlreadyScheduled { job_id, .. } => Some(*job_id),
            DispatchOutcome::RanInline => None,
        }
    }

    /// When the job will run, if this dispatch decided it.
    pub fn run_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DispatchOutcome::Created { run_at, .. } | DispatchOutcome::Rescheduled { run_at, .. } => {
                Some(*run_at)
            }
            DispatchOutcome::AlreadyScheduled { postponed_to, .. } => *postponed_to,
            DispatchOutcome::RanInline => None,
        }
    }
}

/// Successful end of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Finished {
        task_id: TaskId,
    },
    RetryScheduled {
        task_id: TaskId,
        next_try: u32,
        dispatch: DispatchOutcome,
    },
}

impl ProcessOutcome {
    pub fn task_id(&self) -> TaskId {
        match self {
            ProcessOutcome::Finished { task_id } | ProcessOutcome::RetryScheduled { task_id, .. } => {
                *task_id
            }
        }
    }

    pub fn state(&self) -> TaskState {
        match self {
            ProcessOutcome::Finished { .. } => TaskState::Finished,
            ProcessOutcome::RetryScheduled { .. } => TaskState::RetryScheduled,
        }
    }
}

pub struct Regulator {
    config: RegulatorConfig,
    registry: Arc<TaskRegistry>,
    repository: TaskRepository,
    scheduler: Arc<dyn JobScheduler>,
    logger: TaskLogger,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    herder: Herder,
}

impl Regulator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: RegulatorConfig,
        registry: Arc<TaskRegistry>,
        repository: TaskRepository,
        scheduler: Arc<dyn JobScheduler>,
        logger: TaskLogger,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        herder: Herder,
    ) -> Self {
        Self {
            config,
            registry,
            repository,
            scheduler,
            logger,
            events,
            clock,
            herder,
        }
    }

    pub fn config(&self) -> &RegulatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    pub fn herder(&self) -> &Herder {
        &self.herder
    }

    /// Wrap and dispatch `task` to run as soon as possible.
    pub async fn submit<T: Task>(&self, task: T) -> Result<DispatchOutcome, RegulatorError> {
        self.dispatch(TaskEnvelope::new(task)?, Duration::ZERO).await
    }

    pub async fn dispatch(
        &self,
        mut envelope: TaskEnvelope,
        delay: Duration,
    ) -> Result<DispatchOutcome, RegulatorError> {
        if !self.repository.is_available().await {
            return self.run_inline(envelope).await;
        }
        if !self.registry.contains(envelope.task_type()) {
            return Err(RegulatorError::UnknownTaskType(
                envelope.task_type().to_string(),
            ));
        }

        let task = envelope.task();
        let group = task.group().unwrap_or_else(|| self.config.default_group());
        let query = JobQuery {
            group: group.clone(),
            task_type: envelope.task_type().to_string(),
            args_fingerprint: envelope.args_fingerprint().clone(),
        };
        let pending = match self.scheduler.find_pending(&query).await {
            Ok(pending) => pending,
            Err(e) => return Err(self.scheduling_failed(&envelope, e.into())),
        };
        if let Some(job_id) = pending {
            return self.coalesce(&envelope, job_id).await;
        }

        let run_at = offset(self.clock.now(), delay);
        let request = JobRequest {
            run_at,
            task_type: envelope.task_type().to_string(),
            type_fingerprint: envelope.type_fingerprint().clone(),
            args_fingerprint: envelope.args_fingerprint().clone(),
            group: group.clone(),
            unique: task.is_unique(),
            priority: task.priority(),
        };
        let job_id = match self.scheduler.schedule(request).await {
            Ok(job_id) => job_id,
            Err(e) => return Err(self.scheduling_failed(&envelope, e.into())),
        };

        let first_dispatch = envelope.id().is_none();
        let task_id = match self.repository.save(&mut envelope, job_id).await {
            Ok(task_id) => task_id,
            Err(e) => {
                match self.scheduler.delete(job_id).await {
                    Ok(_) => debug!(%job_id, "rolled back job after failed persist"),
                    Err(rollback) => {
                        warn!(%job_id, error = %rollback, "rollback of scheduled job failed")
                    }
                }
                return Err(self.scheduling_failed(&envelope, e));
            }
        };

        if !first_dispatch {
            debug!(%task_id, %job_id, current_try = envelope.current_try(), %run_at, "task rescheduled");
            return Ok(DispatchOutcome::Rescheduled {
                task_id,
                job_id,
                run_at,
            });
        }

        self.logger
            .write(
                task_id,
                job_id,
                LogKind::Created,
                LogLevel::Info,
                format!("{} created", envelope.task_type()),
                json!({ "group": group.as_str(), "run_at": run_at.to_rfc3339() }),
            )
            .await?;
        self.events.emit(&RegulatorEvent::TaskCreated {
            task_id,
            job_id,
            task_type: envelope.task_type().to_string(),
        });
        Ok(DispatchOutcome::Created {
            task_id,
            job_id,
            run_at,
        })
    }

    async fn coalesce(
        &self,
        envelope: &TaskEnvelope,
        job_id: JobId,
    ) -> Result<DispatchOutcome, RegulatorError> {
        let task_id = self.repository.find_by_job_id(job_id).await?.map(|r| r.id);

        let debounce = envelope.task().debounce_policy();
        let mut postponed_to = None;
        if self.config.debounce_on_duplicate && debounce.is_debouncable() {
            let run_at = offset(self.clock.now(), debounce.debounce_delay());
            if self.scheduler.postpone(job_id, run_at).await? {
                postponed_to = Some(run_at);
            }
        }

        info!(
            task_type = envelope.task_type(),
            %job_id,
            postponed = postponed_to.is_some(),
            "task already scheduled"
        );
        self.events.emit(&RegulatorEvent::TaskAlreadyScheduled {
            task_id,
            job_id: Some(job_id),
            task_type: envelope.task_type().to_string(),
        });
        Ok(DispatchOutcome::AlreadyScheduled {
            task_id,
            job_id,
            postponed_to,
        })
    }

    /// Run the task right here, without a row or a job.
    pub async fn run_inline(&self, envelope: TaskEnvelope) -> Result<DispatchOutcome, RegulatorError> {
        warn!(
            task_type = envelope.task_type(),
            "task store unavailable, running task synchronously"
        );
        let ctx = TaskContext::new(None, None, envelope.current_try(), self);
        let result = envelope.task().process(&ctx).await;

        self.events.emit(&RegulatorEvent::TaskDispatchedSynchronously {
            task_type: envelope.task_type().to_string(),
            args_fingerprint: envelope.args_fingerprint().clone(),
            error: result.as_ref().err().map(ToString::to_string),
        });
        match result {
            Ok(()) => Ok(DispatchOutcome::RanInline),
            Err(source) => Err(RegulatorError::InlineExecutionFailed {
                task_type: envelope.task_type().to_string(),
                source,
            }),
        }
    }

    fn scheduling_failed(&self, envelope: &TaskEnvelope, error: RegulatorError) -> RegulatorError {
        warn!(
            task_type = envelope.task_type(),
            args_fingerprint = %envelope.args_fingerprint(),
            error = %error,
            "task scheduling failed"
        );
        self.events.emit(&RegulatorEvent::TaskSchedulingFailed {
            payload: envelope.payload().clone(),
            args_fingerprint: envelope.args_fingerprint().clone(),
            error: error.to_string(),
        });
        RegulatorError::SchedulingFailed {
            task_type: envelope.task_type().to_string(),
            source: Box::new(error),
        }
    }

    /// Convenience for workers: run the task behind `job`.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        job: &Job,
    ) -> Result<ProcessOutcome, RegulatorError> {
        self.process_task(ctx, &job.request.task_type, &job.request.args_fingerprint)
            .await
    }

    /// Execute the task behind the job currently running in `ctx`.
    pub async fn process_task(
        &self,
        ctx: &ExecutionContext,
        task_type: &str,
        args_fingerprint: &ArgsFingerprint,
    ) -> Result<ProcessOutcome, RegulatorError> {
        let entry = self
            .registry
            .get(task_type)
            .ok_or_else(|| RegulatorError::UnknownTaskType(task_type.to_string()))?;
        let job_id = ctx
            .current_job()
            .ok_or(RegulatorError::MissingExecutionContext)?;
        let mut envelope = self
            .repository
            .get_by_job_id(job_id, entry.type_fingerprint(), args_fingerprint)
            .await?
            .ok_or(RegulatorError::TaskRecordNotFound { job_id })?;
        let task_id = envelope
            .id()
            .ok_or(RegulatorError::TaskRecordNotFound { job_id })?;
        let current_try = envelope.current_try();

        self.logger
            .write(
                task_id,
                job_id,
                LogKind::Started,
                LogLevel::Info,
                format!("{task_type} started"),
                json!({ "try": current_try }),
            )
            .await?;

        let task_ctx = TaskContext::new(Some(task_id), Some(job_id), current_try, self);
        let result = envelope.task().process(&task_ctx).await;

        let error = match result {
            Ok(()) => {
                self.logger
                    .write(
                        task_id,
                        job_id,
                        LogKind::Finished,
                        LogLevel::Info,
                        format!("{task_type} finished"),
                        json!({ "try": current_try }),
                    )
                    .await?;
                return Ok(ProcessOutcome::Finished { task_id });
            }
            Err(error) => error,
        };

        match error {
            TaskError::Retryable { .. } => {
                let policy = envelope.task().retry_policy();
                if !policy.should_retry(current_try) {
                    self.log_failed(task_id, job_id, &error, LogLevel::Error, json!({
                        "try": current_try,
                        "retries_exhausted": policy.is_retryable(),
                    }))
                    .await?;
                    return Err(RegulatorError::TaskFailed {
                        task_id,
                        source: error,
                    });
                }

                let next_try = current_try.saturating_add(1);
                let delay = policy.retry_delay(next_try);
                self.logger
                    .write(
                        task_id,
                        job_id,
                        LogKind::Rescheduled,
                        LogLevel::Warning,
                        error.to_string(),
                        json!({ "try": current_try }),
                    )
                    .await?;
                self.logger
                    .write(
                        task_id,
                        job_id,
                        LogKind::Retrying,
                        LogLevel::Info,
                        format!("retrying in {}s", delay.as_secs()),
                        json!({ "next_try": next_try, "delay_secs": delay.as_secs() }),
                    )
                    .await?;

                envelope.set_current_try(next_try);
                match self.dispatch(envelope, delay).await {
                    Ok(dispatch) => Ok(ProcessOutcome::RetryScheduled {
                        task_id,
                        next_try,
                        dispatch,
                    }),
                    Err(dispatch_error) => {
                        // The row was reclaimed while the task ran: nothing to log against.
                        if row_vanished(&dispatch_error) {
                            warn!(%task_id, %job_id, "task row reclaimed during execution, retry dropped");
                            return Err(dispatch_error);
                        }
                        if let Err(e) = self
                            .logger
                            .write(
                                task_id,
                                job_id,
                                LogKind::Failed,
                                LogLevel::Error,
                                format!("retry could not be scheduled: {dispatch_error}"),
                                json!({ "try": current_try }),
                            )
                            .await
                        {
                            warn!(%task_id, error = %e, "failed to log unscheduled retry");
                        }
                        Err(dispatch_error)
                    }
                }
            }
            TaskError::FailWithoutRetry { .. } => {
                self.log_failed(task_id, job_id, &error, LogLevel::Error, json!({
                    "try": current_try,
                    "retryable": false,
                }))
                .await?;
                Err(RegulatorError::TaskFailed {
                    task_id,
                    source: error,
                })
            }
            TaskError::Unexpected(_) => {
                self.log_failed(task_id, job_id, &error, LogLevel::Critical, json!({
                    "try": current_try,
                    "unclassified": true,
                }))
                .await?;
                Err(RegulatorError::Unclassified {
                    task_id,
                    source: error,
                })
            }
        }
    }

    async fn log_failed(
        &self,
        task_id: TaskId,
        job_id: JobId,
        error: &TaskError,
        level: LogLevel,
        context: serde_json::Value,
    ) -> Result<LogEntry, RegulatorError> {
        Ok(self
            .logger
            .write(task_id, job_id, LogKind::Failed, level, error.to_string(), context)
            .await?)
    }

    /// Feed a scheduler notification into `ctx` and react to deletions.
    pub async fn handle_notification(
        &self,
        ctx: &mut ExecutionContext,
        notification: &SchedulerNotification,
    ) -> Result<(), RegulatorError> {
        ctx.observe(notification);
        if let SchedulerNotification::JobDeleted(job_id) = notification {
            self.on_job_deleted(*job_id).await?;
        }
        Ok(())
    }

    /// Drop every row referencing a job the scheduler deleted.
    pub async fn on_job_deleted(&self, job_id: JobId) -> Result<usize, RegulatorError> {
        let deleted = self.repository.delete_by_job_ids(&[job_id]).await?;
        if deleted > 0 {
            debug!(%job_id, deleted, "removed task rows of deleted job");
        }
        Ok(deleted)
    }

    /// Cancel a task whose job has not started yet.
    ///
    /// Returns `false` when the task is unknown or its job is no longer
    /// pending.
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool, RegulatorError> {
        let Some(record) = self.repository.get_record(task_id).await? else {
            return Ok(false);
        };
        if !self.scheduler.is_pending(record.job_id).await? {
            return Ok(false);
        }
        if !self.scheduler.delete(record.job_id).await? {
            return Ok(false);
        }
        self.logger
            .write(
                task_id,
                record.job_id,
                LogKind::Cancelled,
                LogLevel::Notice,
                format!("{} cancelled", record.payload.task_type),
                json!({ "try": record.current_try }),
            )
            .await?;
        Ok(true)
    }

    /// Lifecycle log of a task, oldest first.
    pub async fn retrieve_logs(&self, task_id: TaskId) -> Result<Vec<LogEntry>, RegulatorError> {
        Ok(self.logger.for_task(task_id).await?)
    }

    /// Current state derived from the row, its last log entry and its job.
    pub async fn task_state(&self, task_id: TaskId) -> Result<Option<TaskState>, RegulatorError> {
        let Some(record) = self.repository.get_record(task_id).await? else {
            return Ok(None);
        };
        let logs = self.logger.for_task(task_id).await?;
        let state = match logs.last().map(|e| e.kind) {
            Some(LogKind::Finished) => TaskState::Finished,
            Some(LogKind::Failed) => TaskState::Failed,
            Some(LogKind::Cancelled) => TaskState::Cancelled,
            last => match self.scheduler.status(record.job_id).await? {
                Some(JobStatus::Running) => TaskState::Running,
                Some(JobStatus::Pending) if last.is_none() => TaskState::Created,
                Some(JobStatus::Pending) if record.current_try > 0 => TaskState::RetryScheduled,
                Some(JobStatus::Pending) => TaskState::Pending,
                Some(JobStatus::Complete) => TaskState::Finished,
                Some(JobStatus::Failed) => TaskState::Failed,
                Some(JobStatus::Canceled) | None => TaskState::Cancelled,
            },
        };
        Ok(Some(state))
    }
}

fn row_vanished(error: &RegulatorError) -> bool {
    matches!(
        error,
        RegulatorError::SchedulingFailed { source, .. }
            if matches!(**source, RegulatorError::Store(StoreError::NotFound(_)))
    )
}
