//! App - アプリケーション層
//!
//! ports を組み合わせて regulation engine を実装します。
//!
//! # 主要コンポーネント
//! - **RegulatorBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **Regulator**: dispatch / 実行 / retry の調停
//! - **TaskRepository**: scheduler と突き合わせる task 行の facade
//! - **TaskLogger**: ライフサイクルログ
//! - **Herder**: 孤児レコードの回収
//! - **ExecutionContext**: 実行中ジョブの追跡

pub mod builder;
pub mod config;
pub mod context;
pub mod herder;
pub mod regulator;
pub mod repository;
pub mod table_names;
pub mod task_logger;

pub use self::builder::{BuildError, RegulatorBuilder};
pub use self::config::{ConfigError, RegulatorConfig};
pub use self::context::ExecutionContext;
pub use self::herder::{HerdReport, HerdTask, Herder};
pub use self::regulator::{DispatchOutcome, ProcessOutcome, Regulator};
pub use self::repository::TaskRepository;
pub use self::table_names::TableNames;
pub use self::task_logger::TaskLogger;
