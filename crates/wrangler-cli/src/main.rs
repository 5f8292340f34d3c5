use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wrangler_core::app::{HerdTask, Herder};
use wrangler_core::domain::RetryPolicy;
use wrangler_core::impls::{InMemoryScheduler, InMemoryStore, RecordingEventSink};
use wrangler_core::ports::{Clock, FixedClock, SystemClock};
use wrangler_core::{RegulatorBuilder, RegulatorConfig, Task, TaskContext, TaskError};

/// 最初の数回はわざと失敗する（retry/backoff のデモ用）
static REMAINING_FAILURES: AtomicU32 = AtomicU32::new(2);

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

#[async_trait]
impl Task for Hello {
    const TYPE: &'static str = "demo.hello.v1";

    async fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let left = REMAINING_FAILURES.load(Ordering::Relaxed);
        if left > 0 {
            REMAINING_FAILURES.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskError::retryable(format!(
                "intentional failure (left={left})"
            )));
        }
        info!(current_try = ctx.current_try(), "Hello, {}!", self.name);
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::limited(3)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定：引数に TOML のパスがあれば読む
    let config = match std::env::args().nth(1) {
        Some(path) => RegulatorConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => RegulatorConfig::default(),
    };

    // (B) in-memory の collaborator を組み立てる（時計は手で進める）
    let clock = Arc::new(FixedClock::new(SystemClock.now()));
    let scheduler = Arc::new(InMemoryScheduler::new(clock.clone()));
    let store = Arc::new(InMemoryStore::new());
    let events = Arc::new(RecordingEventSink::new());
    let regulator = RegulatorBuilder::new()
        .register::<Hello>()?
        .expect_tasks(&[Hello::TYPE, HerdTask::TYPE])
        .with_config(config)
        .with_clock(clock.clone())
        .with_store(store.clone())
        .with_scheduler(scheduler.clone())
        .with_event_sink(events.clone())
        .build()?;

    // (C) herd の初回と、デモ用タスクを二重に投入（二回目は合流する）
    Herder::ensure_scheduled(&regulator).await?;
    let first = regulator
        .submit(Hello {
            name: "wrangler".into(),
        })
        .await?;
    let second = regulator
        .submit(Hello {
            name: "wrangler".into(),
        })
        .await?;
    info!(?first, ?second, "dispatched");

    // (D) worker 役：期限の来たジョブを実行し、次のジョブまで時計を進める
    let Some(task_id) = first.task_id() else {
        return Ok(());
    };
    loop {
        for run in scheduler.run_due(&regulator).await {
            match &run.result {
                Ok(outcome) => info!(job_id = %run.job_id, task_type = %run.task_type, state = ?outcome.state(), "job done"),
                Err(e) => info!(job_id = %run.job_id, task_type = %run.task_type, error = %e, "job failed"),
            }
        }
        let next = scheduler
            .pending_jobs()
            .into_iter()
            .filter(|job| job.request.task_type == Hello::TYPE)
            .map(|job| job.request.run_at)
            .min();
        match next {
            Some(run_at) => clock.set(run_at),
            None => break,
        }
    }

    // (E) 結果の確認
    for entry in regulator.retrieve_logs(task_id).await? {
        info!(
            at = %entry.timestamp,
            level = %entry.level,
            kind = %entry.kind,
            "{}",
            entry.message
        );
    }
    info!(state = ?regulator.task_state(task_id).await?, events = ?events.names(), "final");
    Ok(())
}
