//! TaskRegistry - task type name から decoder への対応表
//!
//! Execution only receives a type name and fingerprints; the registry turns
//! a stored row back into a runnable task. Built during initialization
//! (mutable), used during runtime (immutable, shared via `Arc`).

use std::collections::HashMap;

use super::envelope::TaskEnvelope;
use super::erased::{DynTask, TypedTask};
use super::task::Task;
use crate::domain::{RegulatorError, TaskRecord, TypeFingerprint};

type DecodeFn = fn(serde_json::Value) -> Result<Box<dyn DynTask>, serde_json::Error>;

fn decode<T: Task>(args: serde_json::Value) -> Result<Box<dyn DynTask>, serde_json::Error> {
    let task: T = serde_json::from_value(args)?;
    Ok(Box::new(TypedTask::new(task)))
}

/// One registered task type.
#[derive(Clone)]
pub struct RegistryEntry {
    version: u32,
    type_fingerprint: TypeFingerprint,
    decode: DecodeFn,
}

impl RegistryEntry {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn type_fingerprint(&self) -> &TypeFingerprint {
        &self.type_fingerprint
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task>(&mut self) -> Result<(), RegistryError> {
        let task_type = T::TYPE.to_string();
        if self.entries.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.entries.insert(
            task_type,
            RegistryEntry {
                version: T::VERSION,
                type_fingerprint: TypeFingerprint::of(T::TYPE, T::VERSION),
                decode: decode::<T>,
            },
        );
        Ok(())
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.entries.contains_key(task_type)
    }

    pub fn get(&self, task_type: &str) -> Option<&RegistryEntry> {
        self.entries.get(task_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entries.keys().cloned().collect();
        types.sort();
        types
    }

    /// Rebuild the task stored in `record`.
    ///
    /// Fails with `InvalidPayload` when the stored type is no longer
    /// registered, was written by another version, or no longer decodes.
    pub fn restore(&self, record: &TaskRecord) -> Result<TaskEnvelope, RegulatorError> {
        let task_type = &record.payload.task_type;
        let entry = self.entries.get(task_type).ok_or_else(|| {
            RegulatorError::InvalidPayload(format!("task type {task_type} is not registered"))
        })?;
        if entry.type_fingerprint != record.type_fingerprint {
            return Err(RegulatorError::InvalidPayload(format!(
                "{task_type} v{} stored as {}, registered as v{} ({})",
                record.payload.version,
                record.type_fingerprint,
                entry.version,
                entry.type_fingerprint
            )));
        }
        let task = (entry.decode)(record.payload.args.clone()).map_err(|e| {
            RegulatorError::InvalidPayload(format!("{task_type} arguments no longer decode: {e}"))
        })?;
        Ok(TaskEnvelope::restore(task, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArgsFingerprint, JobId, SerializedPayload, TaskError, TaskId};
    use crate::typed::TaskContext;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use ulid::Ulid;

    #[derive(Serialize, Deserialize)]
    struct Resize {
        width: u32,
    }

    #[async_trait]
    impl Task for Resize {
        const TYPE: &'static str = "test.image.resize";
        const VERSION: u32 = 2;

        async fn process(&self, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn record_for(task_type: &str, version: u32, args: serde_json::Value) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: TaskId::from_ulid(Ulid::new()),
            job_id: JobId::from_ulid(Ulid::new()),
            type_fingerprint: TypeFingerprint::of(task_type, version),
            args_fingerprint: ArgsFingerprint::of(&args),
            current_try: 2,
            payload: SerializedPayload {
                task_type: task_type.to_string(),
                version,
                args,
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register::<Resize>().unwrap();
        let result = registry.register::<Resize>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
        assert_eq!(registry.registered_types(), vec![Resize::TYPE.to_string()]);
    }

    #[test]
    fn restore_round_trips_persistence_state() {
        let mut registry = TaskRegistry::new();
        registry.register::<Resize>().unwrap();
        let record = record_for(Resize::TYPE, 2, json!({ "width": 640 }));

        let envelope = registry.restore(&record).unwrap();

        assert_eq!(envelope.id(), Some(record.id));
        assert_eq!(envelope.job_id(), Some(record.job_id));
        assert_eq!(envelope.current_try(), 2);
        assert_eq!(envelope.task().version(), 2);
    }

    #[test]
    fn restore_rejects_unknown_stale_or_malformed_payloads() {
        let mut registry = TaskRegistry::new();
        registry.register::<Resize>().unwrap();

        let unknown = record_for("test.gone", 1, json!({}));
        let stale = record_for(Resize::TYPE, 1, json!({ "width": 640 }));
        let malformed = record_for(Resize::TYPE, 2, json!({ "height": 480 }));

        for record in [unknown, stale, malformed] {
            let err = registry.restore(&record).unwrap_err();
            assert!(matches!(err, RegulatorError::InvalidPayload(_)), "{err}");
        }
    }
}
