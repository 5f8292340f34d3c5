//! RegulatorBuilder - Regulator の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::config::{ConfigError, RegulatorConfig};
use super::herder::{HerdTask, Herder};
use super::regulator::Regulator;
use super::repository::TaskRepository;
use super::task_logger::TaskLogger;
use crate::impls::TracingEventSink;
use crate::ports::{
    Clock, EventSink, IdGenerator, JobScheduler, LogStore, SystemClock, TaskStore, UlidGenerator,
};
use crate::typed::{RegistryError, Task, TaskRegistry};

/// RegulatorBuilder は Regulator を構築
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(InMemoryStore::new());
/// let regulator = RegulatorBuilder::new()
///     .register::<SendMail>()?
///     .expect_tasks(&["acme.mail.send"])
///     .with_store(store)
///     .with_scheduler(scheduler)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - store / scheduler が未設定なら BuildError
/// - `HerdTask` は自動登録
pub struct RegulatorBuilder {
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
    config: RegulatorConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Option<Arc<dyn EventSink>>,
    task_store: Option<Arc<dyn TaskStore>>,
    log_store: Option<Arc<dyn LogStore>>,
    scheduler: Option<Arc<dyn JobScheduler>>,
}

/// BuildError は Regulator 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
    #[error("no task store configured, call with_store()")]
    MissingStore,
    #[error("no job scheduler configured, call with_scheduler()")]
    MissingScheduler,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RegulatorBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            expected_tasks: None,
            config: RegulatorConfig::default(),
            clock: None,
            ids: None,
            events: None,
            task_store: None,
            log_store: None,
            scheduler: None,
        }
    }

    /// Task type を登録
    pub fn register<T: Task>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<T>()?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_config(mut self, config: RegulatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// One backend for both task rows and their logs.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: TaskStore + LogStore + 'static,
    {
        let task_store: Arc<dyn TaskStore> = store.clone();
        let log_store: Arc<dyn LogStore> = store;
        self.task_store = Some(task_store);
        self.log_store = Some(log_store);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// # 検証
    /// - config が妥当か
    /// - expect_tasks() で設定された task_type が全て登録されているか
    /// - store / scheduler が設定されているか
    pub fn build(mut self) -> Result<Regulator, BuildError> {
        self.config.validate()?;
        if !self.registry.contains(HerdTask::TYPE) {
            self.registry.register::<HerdTask>()?;
        }
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        let (Some(task_store), Some(log_store)) = (self.task_store, self.log_store) else {
            return Err(BuildError::MissingStore);
        };
        let scheduler = self.scheduler.ok_or(BuildError::MissingScheduler)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())) as Arc<dyn IdGenerator>);
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(TracingEventSink) as Arc<dyn EventSink>);
        let registry = Arc::new(self.registry);

        let repository = TaskRepository::new(
            task_store.clone(),
            scheduler.clone(),
            registry.clone(),
            clock.clone(),
            ids.clone(),
        );
        let logger = TaskLogger::new(log_store, clock.clone(), ids);
        let herder = Herder::new(
            task_store,
            scheduler.clone(),
            events.clone(),
            self.config.herd_batch_size,
            self.config.herd_interval(),
        );

        Ok(Regulator::new(
            self.config,
            registry,
            repository,
            scheduler,
            logger,
            events,
            clock,
            herder,
        ))
    }
}

impl Default for RegulatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskError;
    use crate::impls::{InMemoryScheduler, InMemoryStore};
    use crate::typed::TaskContext;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct TestTask {}

    #[async_trait]
    impl Task for TestTask {
        const TYPE: &'static str = "test.builder.one";

        async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct AnotherTestTask {}

    #[async_trait]
    impl Task for AnotherTestTask {
        const TYPE: &'static str = "test.builder.another";

        async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn wired() -> RegulatorBuilder {
        let clock = Arc::new(SystemClock);
        RegulatorBuilder::new()
            .with_store(Arc::new(InMemoryStore::new()))
            .with_scheduler(Arc::new(InMemoryScheduler::new(clock)))
    }

    #[test]
    fn test_build_success() {
        let regulator = wired()
            .register::<TestTask>()
            .unwrap()
            .expect_tasks(&[TestTask::TYPE, HerdTask::TYPE])
            .build();
        assert!(regulator.is_ok());
    }

    #[test]
    fn test_build_missing_task_types() {
        let regulator = wired()
            .register::<TestTask>()
            .unwrap()
            .expect_tasks(&[TestTask::TYPE, AnotherTestTask::TYPE])
            .build();
        assert!(matches!(
            regulator,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![AnotherTestTask::TYPE.to_string()]
        ));
    }

    #[test]
    fn test_build_requires_collaborators() {
        assert!(matches!(
            RegulatorBuilder::new().build(),
            Err(BuildError::MissingStore)
        ));
        assert!(matches!(
            RegulatorBuilder::new()
                .with_store(Arc::new(InMemoryStore::new()))
                .build(),
            Err(BuildError::MissingScheduler)
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = RegulatorConfig {
            herd_batch_size: 0,
            ..RegulatorConfig::default()
        };
        assert!(matches!(
            wired().with_config(config).build(),
            Err(BuildError::Config(_))
        ));
    }

    #[test]
    fn test_herd_task_cannot_be_registered_twice() {
        let result = RegulatorBuilder::new().register::<HerdTask>().unwrap().register::<HerdTask>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }
}
