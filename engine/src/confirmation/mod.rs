//! Confirmation gate
//!
//! Decides, before an action is appended, whether the user must approve it:
//!
//! | Action | Policy |
//! |---|---|
//! | `read`, `think`, `browse` | always automatic |
//! | `run`, `edit` | `confirmation_mode`: `off` never asks, `on` asks for Tier 2, `always` asks every time |
//! | `delegate` | `agent_switch_confirmation` |
//!
//! Asking is itself an event: the controller appends a `ConfirmationRequest`
//! action and a responder answers it with a `Confirmation` observation, so
//! replaying a session reproduces every past decision.

mod responder;
mod risk;

pub use responder::{
    Confirmer, ConfirmationResponder, Decision, FixedConfirmer, TerminalConfirmer,
};
pub use risk::{RiskAssessor, RiskTier};

use sdk::event::Action;
use tracing::debug;

use crate::config::{ConfirmationMode, ControlConfig};

/// Outcome of [`ConfirmationGate::review`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Proceed without asking
    Auto,
    /// Ask the user first
    Confirm { reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    mode: ConfirmationMode,
    agent_switch_confirmation: bool,
    assessor: RiskAssessor,
}

impl ConfirmationGate {
    pub fn new(mode: ConfirmationMode, agent_switch_confirmation: bool) -> Self {
        Self {
            mode,
            agent_switch_confirmation,
            assessor: RiskAssessor::new(),
        }
    }

    pub fn from_config(control: &ControlConfig) -> Self {
        Self::new(control.confirmation_mode, control.agent_switch_confirmation)
    }

    pub fn review(&self, action: &Action) -> GateDecision {
        let decision = match action {
            Action::Delegate { agent, .. } => {
                if self.agent_switch_confirmation {
                    GateDecision::Confirm {
                        reason: format!("switch to agent '{}'", agent),
                    }
                } else {
                    GateDecision::Auto
                }
            }
            action if action.is_read_only() => GateDecision::Auto,
            action if action.is_runnable() => {
                let tier = self.assessor.assess(action);
                match (self.mode, tier) {
                    (ConfirmationMode::Off, _) => GateDecision::Auto,
                    (ConfirmationMode::On, RiskTier::Tier2) => GateDecision::Confirm {
                        reason: "destructive action".to_string(),
                    },
                    (ConfirmationMode::On, _) => GateDecision::Auto,
                    (ConfirmationMode::Always, _) => GateDecision::Confirm {
                        reason: format!("{:?} action", tier).to_lowercase(),
                    },
                }
            }
            _ => GateDecision::Auto,
        };
        debug!(action = action.subkind(), ?decision, "Gate reviewed action");
        decision
    }
}
