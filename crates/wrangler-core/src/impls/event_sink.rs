//! EventSink 実装
//!
//! - `TracingEventSink`: 既定。イベントを tracing に流すだけ
//! - `RecordingEventSink`: テスト用。受け取ったイベントを溜めておく

use std::sync::Mutex;

use tracing::{info, warn};

use crate::domain::RegulatorEvent;
use crate::ports::EventSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &RegulatorEvent) {
        let name = event.name();
        match event {
            RegulatorEvent::TaskCreated {
                task_id,
                job_id,
                task_type,
            } => info!(event = name, %task_id, %job_id, task_type = %task_type),
            RegulatorEvent::TaskAlreadyScheduled {
                task_id,
                job_id,
                task_type,
            } => info!(event = name, ?task_id, ?job_id, task_type = %task_type),
            RegulatorEvent::TaskSchedulingFailed {
                payload,
                args_fingerprint,
                error,
            } => warn!(
                event = name,
                task_type = %payload.task_type,
                %args_fingerprint,
                error = %error
            ),
            RegulatorEvent::TaskDispatchedSynchronously {
                task_type,
                args_fingerprint,
                error,
            } => warn!(event = name, task_type = %task_type, %args_fingerprint, ?error),
            RegulatorEvent::HerdingProcessed { deleted } => info!(event = name, deleted),
        }
    }
}

/// Keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RegulatorEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RegulatorEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names of the recorded events, e.g. `["task_created"]`.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(RegulatorEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &RegulatorEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
