// State machine module for bulk operations and their per-record details.
//
// Operation status is mutated only by the orchestrator (status) while the
// progress aggregator owns the counters; both go through these rules.

pub mod errors;
pub mod events;
pub mod operation_state_machine;
pub mod states;

pub use errors::StateMachineError;
pub use events::OperationEvent;
pub use operation_state_machine::OperationStateMachine;
pub use states::{DetailStatus, OperationStatus};
