// Envelope state machine
//
// Pending -> Processing -> {Delivered, Partial, Failed (retry scheduled), Abandoned}.
// Failed envelopes go back to Processing when their backoff window elapses.

pub mod envelope_state_machine;
pub mod events;
pub mod states;

pub use envelope_state_machine::EnvelopeStateMachine;
pub use events::EnvelopeEvent;
pub use states::DeliveryState;
