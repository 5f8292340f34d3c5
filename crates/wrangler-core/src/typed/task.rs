//! Task trait - 型付き Task の定義
//!
//! A task is a serializable value whose fields are its constructor
//! arguments. The arguments are its identity: two tasks of the same type
//! with equal arguments are the same task for deduplication purposes.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::Regulator;
use crate::domain::{DebouncePolicy, Group, JobId, Priority, RetryPolicy, TaskError, TaskId};

/// Unit of deferred work.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendMail {
///     to: String,
/// }
///
/// #[async_trait]
/// impl Task for SendMail {
///     const TYPE: &'static str = "acme.mail.send";
///
///     async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
///         mailer::send(&self.to).map_err(TaskError::retryable_from)
///     }
///
///     fn retry_policy(&self) -> RetryPolicy {
///         RetryPolicy::limited(3)
///     }
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: arguments are persisted and rebuilt
///   on the worker, so they cannot capture closures or borrowed data
/// - `Send + Sync + 'static`: tasks move between threads inside `Box<dyn DynTask>`
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registered type name, e.g. `acme.billing.charge`.
    const TYPE: &'static str;

    /// Bump when the argument layout changes incompatibly. Rows written by
    /// another version no longer resolve and fail with `InvalidPayload`.
    const VERSION: u32 = 1;

    /// Do the work. The outcome is signalled only through the error kind.
    async fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError>;

    /// `None` files the job under the configured default group.
    fn group(&self) -> Option<Group> {
        None
    }

    fn priority(&self) -> Priority {
        Priority::DEFAULT
    }

    /// Ask the scheduler to refuse a second pending job of this type.
    fn is_unique(&self) -> bool {
        false
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    fn debounce_policy(&self) -> DebouncePolicy {
        DebouncePolicy::disabled()
    }
}

/// What a running task can see about its own execution.
///
/// `task_id` / `job_id` are `None` when the task runs inline because the
/// store was unavailable.
pub struct TaskContext<'a> {
    task_id: Option<TaskId>,
    job_id: Option<JobId>,
    current_try: u32,
    regulator: &'a Regulator,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        task_id: Option<TaskId>,
        job_id: Option<JobId>,
        current_try: u32,
        regulator: &'a Regulator,
    ) -> Self {
        Self {
            task_id,
            job_id,
            current_try,
            regulator,
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    /// Zero on the first attempt, then the number of retries scheduled so far.
    pub fn current_try(&self) -> u32 {
        self.current_try
    }

    pub fn regulator(&self) -> &'a Regulator {
        self.regulator
    }
}
