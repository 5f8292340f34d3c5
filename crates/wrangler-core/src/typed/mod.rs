//! Typed - 型付き Task API
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait - 型安全、引数がそのまま identity
//! - **内部（Dyn）**: `DynTask` trait - object-safe, type erasure
//!
//! `TaskEnvelope` carries an erased task together with its fingerprints and
//! persistence state; `TaskRegistry` rebuilds envelopes from stored rows.

pub mod codec;
pub mod envelope;
pub mod erased;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::envelope::TaskEnvelope;
pub use self::erased::{DynTask, TypedTask};
pub use self::registry::{RegistryEntry, RegistryError, TaskRegistry};
pub use self::task::{Task, TaskContext};
