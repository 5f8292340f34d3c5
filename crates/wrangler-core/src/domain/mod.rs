//! Domain model (IDs, fingerprints, policies, records, logs, errors, events).

pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod ids;
pub mod log;
pub mod policy;
pub mod record;
pub mod state;

pub use self::errors::{BoxError, RegulatorError, SchedulerError, StoreError, TaskError};
pub use self::events::RegulatorEvent;
pub use self::fingerprint::{ArgsFingerprint, TypeFingerprint};
pub use self::ids::{JobId, LogId, TaskId};
pub use self::log::{LogEntry, LogKind, LogLevel};
pub use self::policy::{Backoff, DebouncePolicy, Group, Priority, RetryPolicy};
pub use self::record::{SerializedPayload, TaskRecord};
pub use self::state::{JobStatus, TaskState};
