//! Crew SDK
//!
//! Shared library providing the event model, the runtime contract and the
//! error types used by the crew engine and by external runtimes.

/// Error types and handling
pub mod errors;

/// Event model and on-disk wire format
pub mod event;

/// Runtime contract for executing actions
pub mod runtime;

// Re-export commonly used types
pub use errors::{CrewErrorExt, EngineError};
pub use event::{
    Action, AgentStatus, DelegateInputs, ErrorKind, Event, EventBody, EventId, EventKind,
    EventSource, LlmMetrics, NewEvent, Observation, RejectCode, StateChange, SwitchPhase,
};
pub use runtime::Runtime;
