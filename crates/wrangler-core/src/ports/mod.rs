//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! 外部システム（ジョブスケジューラ, ストレージ, 時刻, 通知先）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod log_store;
pub mod scheduler;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::log_store::LogStore;
pub use self::scheduler::{Job, JobQuery, JobRequest, JobScheduler, SchedulerNotification};
pub use self::task_store::TaskStore;
