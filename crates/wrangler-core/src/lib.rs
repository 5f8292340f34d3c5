//! wrangler-core
//!
//! Durable, idempotent background-task regulation on top of an external
//! job scheduler.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, fingerprint, policy, state, record, log, errors, events）
//! - **ports**: 抽象化レイヤー（JobScheduler, TaskStore, LogStore, EventSink, Clock, IdGenerator）
//! - **typed**: 型付き Task API（Task trait, DynTask, TaskEnvelope, TaskRegistry, PayloadCodec）
//! - **app**: アプリケーションロジック（Regulator, TaskRepository, Herder, builder, config）
//! - **impls**: 実装（InMemoryStore, InMemoryScheduler, SqliteStore など）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::app::{
    DispatchOutcome, ExecutionContext, ProcessOutcome, Regulator, RegulatorBuilder,
    RegulatorConfig,
};
pub use crate::domain::{RegulatorError, TaskError};
pub use crate::typed::{Task, TaskContext, TaskEnvelope};
