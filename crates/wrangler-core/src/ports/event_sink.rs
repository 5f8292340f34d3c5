//! EventSink port - regulator notifications for external observers

use crate::domain::RegulatorEvent;

/// Receives regulator events. Implementations must not block for long:
/// `emit` is called inline on the dispatch/execution path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RegulatorEvent);
}
