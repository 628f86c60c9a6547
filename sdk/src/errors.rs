//! Error types and handling
//!
//! This module provides the error types used throughout the crew engine.
//! All errors implement the `CrewErrorExt` trait which provides user-friendly
//! hints, recoverability information and the process exit code the CLI maps
//! them to.
//!
//! Inside a running session almost nothing surfaces as an `EngineError`:
//! controllers translate failures into events. These variants are what the
//! outer boundary (config loading, stream persistence, the CLI) observes.

use thiserror::Error;

/// Process exit code for a session that finished its task.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code for a user cancellation or denial.
pub const EXIT_USER_CANCEL: i32 = 1;
/// Process exit code for an invalid configuration.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// Process exit code for an unrecoverable runtime failure.
pub const EXIT_RUNTIME_ERROR: i32 = 3;

/// Trait for crew error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait CrewErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors end the session.
    fn is_recoverable(&self) -> bool;

    /// Returns the process exit code the CLI reports for this error
    fn exit_code(&self) -> i32;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: invalid or missing configuration (fatal at startup)
/// - **LLM**: provider failures after retries are exhausted
/// - **Tool**: runtime failures executing an action
/// - **Control**: timeouts, stuck detection, user cancellation
/// - **Stream**: persistence failures and appends after shutdown
///
/// # Examples
///
/// ```
/// use sdk::errors::{CrewErrorExt, EngineError};
///
/// let error = EngineError::Config("unknown field `foo`".to_string());
/// assert_eq!(error.exit_code(), 2);
/// assert!(!error.is_recoverable());
///
/// let timeout = EngineError::Timeout { action_id: 7, secs: 300 };
/// assert_eq!(timeout.to_string(), "action 7 exceeded 300 s and was cancelled.");
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("LLM call timed out")]
    LLMTimeout,

    // Tool errors
    #[error("Tool error: {0}")]
    ToolError(String),

    // Control errors
    #[error("action {action_id} exceeded {secs} s and was cancelled.")]
    Timeout { action_id: u64, secs: u64 },

    #[error("detected repetition pattern; aborting.")]
    Stuck,

    #[error("Cancelled by user")]
    UserCancel,

    // Delegation errors
    #[error("Agent '{from}' is not allowed to delegate to '{to}'")]
    DelegationNotAllowed { from: String, to: String },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    // Stream errors
    #[error("Event stream is closed")]
    StreamClosed,

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Subscriber already registered: {0}")]
    DuplicateSubscriber(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrewErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::LLMProvider(_) => "LLM provider unavailable. Check your API key and network",
            Self::LLMTimeout => "LLM provider took too long to respond. Try again",

            Self::ToolError(_) => "Tool operation failed",

            Self::Timeout { .. } => "The action took too long and was cancelled",
            Self::Stuck => "The agent kept repeating itself. Rephrase the task and try again",
            Self::UserCancel => "Session paused. Resume it with 'crew resume <id>'",

            Self::DelegationNotAllowed { .. } => {
                "Add the target agent to the delegation rules in config.toml"
            }
            Self::UnknownAgent(_) => "Register the agent under [agents] in config.toml",

            Self::StreamClosed => "The session has already shut down",
            Self::InvalidEvent(_) => "The session log contains an invalid event",
            Self::DuplicateSubscriber(_) => "Another component is already attached to this session",
            Self::Persistence(_) => "Failed to write the session log. Check disk space",
            Self::SessionNotFound(_) => "Run 'crew sessions' to see available sessions",
            Self::Serialization(_) => "The session log could not be parsed",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::Stuck
            | Self::StreamClosed
            | Self::InvalidEvent(_)
            | Self::Persistence(_)
            | Self::SessionNotFound(_)
            | Self::Serialization(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::UnknownAgent(_) => EXIT_CONFIG_ERROR,
            Self::UserCancel => EXIT_USER_CANCEL,
            _ => EXIT_RUNTIME_ERROR,
        }
    }
}
