//! Runtime contract
//!
//! A runtime executes runnable actions (`run`, `read`, `edit`, `think`,
//! `browse`) and reports exactly one observation per action. Failures are
//! reported as `Observation::Error`, never as a panic or a missing result.

use async_trait::async_trait;

use crate::event::{Action, EventId, Observation};

/// Executes actions on behalf of agents
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Runtime name, used for logging and subscriber cursors
    fn name(&self) -> &str;

    /// Whether this runtime executes the given action
    fn handles(&self, action: &Action) -> bool {
        action.is_runnable()
    }

    /// Executes an action and returns its single observation.
    ///
    /// Implementations must not fail: internal errors become
    /// `Observation::Error` with a structured reason.
    async fn execute(&self, action_id: EventId, action: &Action) -> Observation;

    /// Requests cancellation of an in-flight action.
    ///
    /// Returns `true` if the action was still running. A cancelled action
    /// produces no observation from the runtime; the controller records the
    /// synthetic one.
    async fn cancel(&self, action_id: EventId) -> bool;
}
