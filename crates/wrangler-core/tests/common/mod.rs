//! Shared harness for the integration tests: in-memory collaborators, a
//! hand-driven clock and a handful of task types with scripted outcomes.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use wrangler_core::app::{Regulator, RegulatorBuilder, RegulatorConfig};
use wrangler_core::domain::{
    DebouncePolicy, Group, LogKind, RetryPolicy, TaskError, TaskId,
};
use wrangler_core::impls::{InMemoryScheduler, InMemoryStore, JobRun, RecordingEventSink};
use wrangler_core::ports::{Clock, FixedClock};
use wrangler_core::typed::{Task, TaskContext};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub scheduler: Arc<InMemoryScheduler>,
    pub store: Arc<InMemoryStore>,
    pub events: Arc<RecordingEventSink>,
    pub regulator: Regulator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RegulatorConfig::default())
    }

    pub fn with_config(config: RegulatorConfig) -> Self {
        let clock = Arc::new(FixedClock::new(start()));
        let scheduler = Arc::new(InMemoryScheduler::new(clock.clone()));
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let regulator = RegulatorBuilder::new()
            .register::<Greet>()
            .unwrap()
            .register::<Flaky>()
            .unwrap()
            .register::<Permanent>()
            .unwrap()
            .register::<Chaotic>()
            .unwrap()
            .register::<Debounced>()
            .unwrap()
            .register::<Elsewhere>()
            .unwrap()
            .register::<Reclaimed>()
            .unwrap()
            .with_config(config)
            .with_clock(clock.clone())
            .with_store(store.clone())
            .with_scheduler(scheduler.clone())
            .with_event_sink(events.clone())
            .build()
            .unwrap();
        Self {
            clock,
            scheduler,
            store,
            events,
            regulator,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    pub async fn run_due(&self) -> Vec<JobRun> {
        self.scheduler.run_due(&self.regulator).await
    }

    pub async fn kinds(&self, task_id: TaskId) -> Vec<LogKind> {
        self.regulator
            .retrieve_logs(task_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }
}

/// Always succeeds.
#[derive(Debug, Serialize, Deserialize)]
pub struct Greet {
    pub name: String,
}

impl Greet {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Task for Greet {
    const TYPE: &'static str = "test.greet";

    async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Fails with a retryable error on the first `failures` attempts.
#[derive(Debug, Serialize, Deserialize)]
pub struct Flaky {
    pub key: String,
    pub failures: u32,
    pub max_retries: i32,
}

#[async_trait]
impl Task for Flaky {
    const TYPE: &'static str = "test.flaky";

    async fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        if ctx.current_try() < self.failures {
            return Err(TaskError::retryable(format!(
                "{} failed on try {}",
                self.key,
                ctx.current_try()
            )));
        }
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.max_retries)
    }
}

/// Fails permanently even though it has a retry budget.
#[derive(Debug, Serialize, Deserialize)]
pub struct Permanent {
    pub key: String,
}

#[async_trait]
impl Task for Permanent {
    const TYPE: &'static str = "test.permanent";

    async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        Err(TaskError::fail_without_retry("request rejected"))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::limited(5)
    }
}

/// Raises an error it does not classify.
#[derive(Debug, Serialize, Deserialize)]
pub struct Chaotic {
    pub key: String,
}

#[async_trait]
impl Task for Chaotic {
    const TYPE: &'static str = "test.chaotic";

    async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        Err(TaskError::unexpected(std::io::Error::other("disk on fire")))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::limited(5)
    }
}

/// Duplicate dispatches push the pending job back by a minute.
#[derive(Debug, Serialize, Deserialize)]
pub struct Debounced {
    pub key: String,
}

#[async_trait]
impl Task for Debounced {
    const TYPE: &'static str = "test.debounced";

    async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }

    fn debounce_policy(&self) -> DebouncePolicy {
        DebouncePolicy::after(Duration::from_secs(60))
    }
}

/// Same arguments as `Greet`-like tasks, filed under another group.
#[derive(Debug, Serialize, Deserialize)]
pub struct Elsewhere {
    pub key: String,
}

#[async_trait]
impl Task for Elsewhere {
    const TYPE: &'static str = "test.elsewhere";

    async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }

    fn group(&self) -> Option<Group> {
        Some(Group::new("elsewhere"))
    }
}

/// Loses its own row mid-run (as if the herder reclaimed it), then fails
/// with a retryable error.
#[derive(Debug, Serialize, Deserialize)]
pub struct Reclaimed {
    pub key: String,
}

#[async_trait]
impl Task for Reclaimed {
    const TYPE: &'static str = "test.reclaimed";

    async fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        if let Some(task_id) = ctx.task_id() {
            ctx.regulator()
                .repository()
                .delete(task_id)
                .await
                .map_err(TaskError::unexpected)?;
        }
        Err(TaskError::retryable("row vanished underneath"))
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::limited(3)
    }
}

/// Never registered with the harness regulator.
#[derive(Debug, Serialize, Deserialize)]
pub struct Unregistered {}

#[async_trait]
impl Task for Unregistered {
    const TYPE: &'static str = "test.unregistered";

    async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        Ok(())
    }
}
