//! crew Engine Library
//!
//! This library provides the control plane of the crew multi-agent
//! assistant: the event stream every component talks through, the agent
//! controllers that drive agents over it, and the collaborators that answer
//! their actions. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Durable event stream and subscriber delivery
pub mod stream;

/// Per-agent state folded from events, history views, delegation stack
pub mod state;

/// LLM provider abstraction layer
pub mod llm;

/// Agents and the agent registry
pub mod agent;

/// Repetition detection over an agent's recent history
pub mod stuck;

/// Confirmation policy and responders
pub mod confirmation;

/// Agent controllers
pub mod controller;

/// Runtimes executing agent actions
pub mod runtime;

/// Session context gathered for agents
pub mod memory;

/// Session wiring and session directories
pub mod session;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
