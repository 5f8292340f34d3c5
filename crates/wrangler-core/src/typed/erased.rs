//! Type erasure for tasks.
//!
//! `Task` has associated constants and serde bounds, so it is not
//! object-safe. `TypedTask<T>` wraps a concrete task behind the
//! object-safe `DynTask`, which is what envelopes and the registry hold.

use async_trait::async_trait;

use super::task::{Task, TaskContext};
use crate::domain::{DebouncePolicy, Group, Priority, RetryPolicy, TaskError};

#[async_trait]
pub trait DynTask: Send + Sync {
    fn task_type(&self) -> &'static str;

    fn version(&self) -> u32;

    fn group(&self) -> Option<Group>;

    fn priority(&self) -> Priority;

    fn is_unique(&self) -> bool;

    fn retry_policy(&self) -> RetryPolicy;

    fn debounce_policy(&self) -> DebouncePolicy;

    async fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError>;
}

pub struct TypedTask<T: Task>(T);

impl<T: Task> TypedTask<T> {
    pub fn new(task: T) -> Self {
        Self(task)
    }
}

#[async_trait]
impl<T: Task> DynTask for TypedTask<T> {
    fn task_type(&self) -> &'static str {
        T::TYPE
    }

    fn version(&self) -> u32 {
        T::VERSION
    }

    fn group(&self) -> Option<Group> {
        self.0.group()
    }

    fn priority(&self) -> Priority {
        self.0.priority()
    }

    fn is_unique(&self) -> bool {
        self.0.is_unique()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.0.retry_policy()
    }

    fn debounce_policy(&self) -> DebouncePolicy {
        self.0.debounce_policy()
    }

    async fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        self.0.process(ctx).await
    }
}
