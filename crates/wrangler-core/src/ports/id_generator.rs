//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために trait として抽象化しています。
//! `UlidGenerator` は Clock を使うので、FixedClock で timestamp 部分を固定できます。

use crate::domain::ids::{JobId, LogId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_job_id(&self) -> JobId;

    fn generate_log_id(&self) -> LogId;
}

/// ULID-based generator driven by a `Clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn generate_log_id(&self) -> LogId {
        LogId::from(self.next())
    }
}
