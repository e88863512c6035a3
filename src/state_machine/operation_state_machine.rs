use super::errors::StateMachineError;
use super::events::OperationEvent;
use super::states::OperationStatus;

/// Transition rules for `BulkOperation.status`.
///
/// `Pending -> Processing -> {Completed, Failed, Cancelled}`, with `Cancel`
/// also accepted straight from `Pending`.
pub struct OperationStateMachine;

impl OperationStateMachine {
    /// Compute the next status for `event`, rejecting illegal transitions.
    pub fn transition(
        current: OperationStatus,
        event: OperationEvent,
    ) -> Result<OperationStatus, StateMachineError> {
        use OperationStatus::*;

        let next = match (current, event) {
            (Pending, OperationEvent::Start) => Processing,
            (Processing, OperationEvent::Finish { successful, failed }) => {
                OperationStatus::from_outcome(successful, failed)
            }
            (Pending | Processing, OperationEvent::Cancel) => Cancelled,
            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(next)
    }

    /// Whether `event` is legal from `current` without computing the target.
    pub fn can_transition(current: OperationStatus, event: OperationEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
