use serde::{Deserialize, Serialize};

/// Events that can trigger bulk operation state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OperationEvent {
    /// An execution path picked the operation up
    Start,
    /// Processing ran to the end with the given outcome counts
    Finish { successful: u64, failed: u64 },
    /// Caller requested cancellation
    Cancel,
}

impl OperationEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Finish { .. } => "finish",
            Self::Cancel => "cancel",
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Cancel)
    }
}
