//! Answers `ConfirmationRequest` events
//!
//! The responder is a stream subscriber. For every unanswered request it
//! asks a [`Confirmer`] on a separate task and appends the decision as a
//! `Confirmation` observation from the user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sdk::event::{Action, Event, EventSource, NewEvent, Observation};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::ConfirmationDefault;
use crate::stream::{EventStream, Subscriber};

/// The user's answer to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub approved: bool,
    pub reason: Option<String>,
}

impl Decision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn decide(&self, agent: &str, candidate: &Action, reason: &str) -> Decision;
}

/// Always gives the same answer. Used for non-interactive runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmer {
    approve: bool,
}

impl FixedConfirmer {
    pub fn approving() -> Self {
        Self { approve: true }
    }

    pub fn denying() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl Confirmer for FixedConfirmer {
    async fn decide(&self, _agent: &str, _candidate: &Action, _reason: &str) -> Decision {
        if self.approve {
            Decision::approve()
        } else {
            Decision::deny("denied by policy")
        }
    }
}

/// Asks on the terminal and reads `y`/`n` from the shared input lines.
///
/// Gives up after `timeout` with the configured default, and denies at once
/// when the interrupt flag is raised.
pub struct TerminalConfirmer {
    input: Arc<Mutex<mpsc::Receiver<String>>>,
    interrupt: watch::Receiver<bool>,
    timeout: Duration,
    default: ConfirmationDefault,
}

impl TerminalConfirmer {
    pub fn new(
        input: Arc<Mutex<mpsc::Receiver<String>>>,
        interrupt: watch::Receiver<bool>,
        timeout: Duration,
        default: ConfirmationDefault,
    ) -> Self {
        Self {
            input,
            interrupt,
            timeout,
            default,
        }
    }

    fn fallback(&self, why: &str) -> Decision {
        match self.default {
            ConfirmationDefault::Approve => Decision {
                approved: true,
                reason: Some(why.to_string()),
            },
            ConfirmationDefault::Deny => Decision::deny(why),
        }
    }
}

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn decide(&self, agent: &str, candidate: &Action, reason: &str) -> Decision {
        let default_label = match self.default {
            ConfirmationDefault::Approve => "Y/n",
            ConfirmationDefault::Deny => "y/N",
        };
        println!(
            "\n[{}] wants to {} ({})\nApprove? [{}] ({} s)",
            agent,
            candidate.summary(),
            reason,
            default_label,
            self.timeout.as_secs()
        );

        let mut interrupt = self.interrupt.clone();
        let mut input = self.input.lock().await;

        tokio::select! {
            line = tokio::time::timeout(self.timeout, input.recv()) => match line {
                Ok(Some(line)) => match line.trim().to_ascii_lowercase().as_str() {
                    "y" | "yes" => Decision::approve(),
                    "n" | "no" => Decision::deny("denied by user"),
                    _ => self.fallback("no clear answer"),
                },
                Ok(None) => self.fallback("input closed"),
                Err(_) => self.fallback("no answer in time"),
            },
            _ = async {
                // A dropped sender can never interrupt
                if interrupt.wait_for(|raised| *raised).await.is_err() {
                    std::future::pending::<()>().await;
                }
            } => Decision::deny("cancelled by user"),
        }
    }
}

/// Stream subscriber that answers confirmation requests
pub struct ConfirmationResponder {
    stream: EventStream,
    confirmer: Arc<dyn Confirmer>,
}

impl ConfirmationResponder {
    pub const NAME: &'static str = "confirmation";

    pub fn new(stream: EventStream, confirmer: Arc<dyn Confirmer>) -> Self {
        Self { stream, confirmer }
    }
}

#[async_trait]
impl Subscriber for ConfirmationResponder {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        let Some(Action::ConfirmationRequest { action, reason }) = event.as_action() else {
            return Ok(());
        };
        if self.stream.has_observation_for(event.id).await {
            debug!(event_id = event.id, "Confirmation request already answered");
            return Ok(());
        }

        let stream = self.stream.clone();
        let confirmer = Arc::clone(&self.confirmer);
        let candidate = action.as_ref().clone();
        let reason = reason.clone();
        tokio::spawn(async move {
            let decision = confirmer.decide(&event.agent, &candidate, &reason).await;
            info!(
                event_id = event.id,
                agent = %event.agent,
                approved = decision.approved,
                "Confirmation decided"
            );
            let answer = NewEvent::observation(
                EventSource::User,
                event.agent.clone(),
                event.id,
                Observation::Confirmation {
                    approved: decision.approved,
                    reason: decision.reason,
                },
            );
            match stream.append_answer(answer).await {
                Ok(Some(_)) => {}
                Ok(None) => debug!(event_id = event.id, "Confirmation request was answered meanwhile"),
                Err(e) => warn!(event_id = event.id, error = %e, "Could not record confirmation"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(
        default: ConfirmationDefault,
        timeout: Duration,
    ) -> (TerminalConfirmer, mpsc::Sender<String>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(4);
        let (interrupt_tx, interrupt_rx) = watch::channel(false);
        (
            TerminalConfirmer::new(Arc::new(Mutex::new(rx)), interrupt_rx, timeout, default),
            tx,
            interrupt_tx,
        )
    }

    fn candidate() -> Action {
        Action::CmdRun {
            command: "rm -rf target".into(),
        }
    }

    #[tokio::test]
    async fn test_terminal_reads_answer() {
        let (confirmer, tx, _interrupt) =
            terminal(ConfirmationDefault::Deny, Duration::from_secs(5));
        tx.send("yes".into()).await.unwrap();
        assert_eq!(
            confirmer.decide("debug", &candidate(), "destructive action").await,
            Decision::approve()
        );

        tx.send("n".into()).await.unwrap();
        assert!(!confirmer.decide("debug", &candidate(), "x").await.approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_timeout_uses_default() {
        let (confirmer, _tx, _interrupt) =
            terminal(ConfirmationDefault::Deny, Duration::from_secs(30));
        let decision = confirmer.decide("debug", &candidate(), "x").await;
        assert_eq!(decision, Decision::deny("no answer in time"));

        let (confirmer, _tx, _interrupt) =
            terminal(ConfirmationDefault::Approve, Duration::from_secs(30));
        assert!(confirmer.decide("debug", &candidate(), "x").await.approved);
    }

    #[tokio::test]
    async fn test_terminal_interrupt_denies() {
        let (confirmer, _tx, interrupt) =
            terminal(ConfirmationDefault::Approve, Duration::from_secs(30));
        interrupt.send_replace(true);
        assert_eq!(
            confirmer.decide("debug", &candidate(), "x").await,
            Decision::deny("cancelled by user")
        );
    }
}
