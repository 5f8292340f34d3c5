//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発用・テスト用の TaskStore + LogStore
//! - **InMemoryScheduler**: 開発用・テスト用の JobScheduler（worker 役の `run_due` 付き）
//! - **TracingEventSink** / **RecordingEventSink**: EventSink
//! - **SqliteStore**: `sqlite` feature で有効になる永続ストア

pub mod event_sink;
pub mod inmem_scheduler;
pub mod inmem_store;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use self::event_sink::{RecordingEventSink, TracingEventSink};
pub use self::inmem_scheduler::{InMemoryScheduler, JobRun};
pub use self::inmem_store::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use self::sqlite_store::SqliteStore;
