//! Decisions of the control loop
//!
//! [`AgentController::reconcile`] derives the next piece of work from the
//! folded state. It is safe to call at any time: every branch either finds
//! its work already recorded in the stream or appends it exactly once.

use std::sync::Arc;

use sdk::errors::EngineError;
use sdk::event::{
    Action, AgentStatus, ErrorKind, Event, EventId, EventSource, NewEvent, Observation,
    RejectCode, StateChange, SwitchPhase,
};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{AgentController, ControllerExit};
use crate::agent::StepOutcome;
use crate::config::StuckPolicy;
use crate::confirmation::GateDecision;
use crate::state::{HistoryView, ParentLink, Transition};
use crate::stream::EventFilter;
use crate::stuck::{StuckPattern, CORRECTIVE_MESSAGE, STUCK_MESSAGE};

/// States recorded with an `AgentStateChanged` observation
const ANNOUNCED: [AgentStatus; 6] = [
    AgentStatus::AwaitingUserInput,
    AgentStatus::Paused,
    AgentStatus::Finished,
    AgentStatus::Rejected,
    AgentStatus::Errored,
    AgentStatus::Stuck,
];

impl AgentController {
    pub(super) async fn reconcile(&mut self) {
        self.publish().await;
        if self.done || !self.settled() {
            return;
        }

        let status = self.state.status;
        if status.is_terminal() {
            self.conclude().await;
            return;
        }
        if let Some(confirmation_id) = self.state.denied_by {
            self.reject_denied(confirmation_id).await;
            return;
        }
        if self.needs_announce(status) {
            self.announce(status).await;
            return;
        }

        match status {
            AgentStatus::Running => match self.state.approved_action.clone() {
                Some(action) => {
                    debug!(subkind = action.subkind(), "Dispatching approved action");
                    let new = NewEvent::action(EventSource::Agent, self.name(), action);
                    self.append(new).await;
                }
                None => self.maybe_step().await,
            },
            AgentStatus::Delegating => self.delegate().await,
            // A request waiting on the user can still complete a loop
            AgentStatus::AwaitingConfirmation => {
                self.check_stuck().await;
            }
            _ => {}
        }
    }

    pub(super) async fn on_transition(&mut self, transition: Transition) {
        info!(from = %transition.from, to = %transition.to, "Agent state changed");
        if self.announce_sent.map_or(false, |sent| sent != transition.to) {
            self.announce_sent = None;
        }

        match transition.to {
            AgentStatus::Paused => {
                self.abort_step();
                let pending = self
                    .state
                    .pending_action
                    .as_ref()
                    .filter(|pending| pending.action.is_runnable())
                    .map(|pending| pending.id);
                if let Some(id) = pending {
                    let message = format!("action {} was cancelled by user pause.", id);
                    self.cancel_pending(id, ErrorKind::Cancelled, message).await;
                }
            }
            AgentStatus::AwaitingUserInput => self.abort_step(),
            to if to.is_terminal() => self.abort_step(),
            _ => {}
        }

        // A pending action gets a fresh timeout window after a pause
        if transition.from == AgentStatus::Paused {
            if let Some(pending) = &self.state.pending_action {
                self.dispatch_clock = Some((pending.id, Instant::now()));
            }
        }
    }

    pub(super) async fn on_step(&mut self, result: Result<StepOutcome, JoinError>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(error = %e, "Agent step failed");
                StepOutcome::new(Action::Error {
                    kind: ErrorKind::Runtime,
                    message: format!("agent step failed: {}", e),
                })
            }
        };

        if self.done
            || self.state.status != AgentStatus::Running
            || self.state.pending_action.is_some()
        {
            debug!(subkind = outcome.action.subkind(), "Discarding step result; agent moved on");
            return;
        }

        let action = self.classify(outcome.action);
        debug!(subkind = action.subkind(), "Agent chose action");
        let new = NewEvent::action(EventSource::Agent, self.name(), action).with_metrics(outcome.metrics);
        self.append(new).await;
    }

    pub(super) async fn on_child_exit(&mut self, result: Result<ControllerExit, JoinError>) {
        let exit = match result {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "Child controller failed");
                ControllerExit {
                    agent: String::from("unknown"),
                    status: AgentStatus::Errored,
                }
            }
        };
        debug!(child = %exit.agent, status = %exit.status, "Child controller exited");

        let Some(pending) = self.state.pending_action.clone() else {
            return;
        };
        let Action::Delegate { agent, .. } = pending.action else {
            return;
        };
        if self.ctx.stream.is_closed() || self.ctx.stream.has_observation_for(pending.id).await {
            return;
        }

        // The child stopped without answering; close the delegation for it
        warn!(child = %agent, status = %exit.status, "Child agent stopped without reporting back");
        if let Err(e) = self.ctx.stack.lock().await.pop(pending.id) {
            warn!(error = %e, "Could not pop delegation frame");
        }
        let answer = Observation::Delegate {
            message: format!(
                "agent '{}' stopped in state {} without reporting back",
                agent, exit.status
            ),
            agent,
            task_completed: false,
        };
        let new = NewEvent::observation(EventSource::Environment, self.name(), pending.id, answer);
        self.answer(new).await;
    }

    pub(super) async fn on_tick(&mut self) {
        if self.done || !self.settled() {
            return;
        }

        let action_timeout = self.ctx.control.action_timeout();
        let expired = match (&self.state.pending_action, self.dispatch_clock) {
            (Some(pending), Some((id, since)))
                if pending.id == id
                    && pending.action.is_runnable()
                    && self.state.status != AgentStatus::Paused
                    && since.elapsed() >= action_timeout =>
            {
                Some(id)
            }
            _ => None,
        };
        if let Some(id) = expired {
            let message = EngineError::Timeout {
                action_id: id,
                secs: action_timeout.as_secs(),
            }
            .to_string();
            warn!(event_id = id, timeout_secs = action_timeout.as_secs(), "Action timed out");
            self.cancel_pending(id, ErrorKind::Timeout, message).await;
            return;
        }

        let inactivity = self.ctx.control.inactivity_timeout();
        if self.state.status == AgentStatus::Running
            && self.state.pending_action.is_none()
            && self.step.is_some()
            && self.last_activity.elapsed() >= inactivity
        {
            info!(idle_secs = inactivity.as_secs(), "No activity; waiting for the user");
            self.abort_step();
            self.announce(AgentStatus::AwaitingUserInput).await;
        }
    }

    pub(super) async fn request_resume(&mut self) {
        info!("Resuming paused agent");
        let new = NewEvent::action(
            EventSource::User,
            self.name(),
            Action::ChangeAgentState {
                change: StateChange::Resume,
            },
        );
        self.append(new).await;
    }

    /// Logs once when a monitoring threshold is crossed. Never stops the agent.
    pub(super) fn monitor(&mut self) {
        let control = &self.ctx.control;
        if !self.warned_iterations && self.state.iteration_flag > control.max_iterations {
            warn!(
                iterations = self.state.iteration_flag,
                max_iterations = control.max_iterations,
                "Iteration count exceeds max_iterations; continuing"
            );
            self.warned_iterations = true;
        }
        if !self.warned_budget && self.state.budget_flag > control.max_budget {
            warn!(
                cost = self.state.budget_flag,
                max_budget = control.max_budget,
                "Accumulated cost exceeds max_budget; continuing"
            );
            self.warned_budget = true;
        }
    }

    /// Publishes this agent's status when it is the one being driven
    async fn publish(&self) {
        let (top, depth) = {
            let stack = self.ctx.stack.lock().await;
            (stack.is_top(self.delegate_id()), stack.depth())
        };
        if !top {
            return;
        }
        let active = super::ActiveAgent {
            agent: self.name(),
            status: self.state.status,
            depth,
        };
        self.ctx.active.send_if_modified(|current| {
            if *current == active {
                return false;
            }
            *current = active;
            true
        });
    }

    async fn conclude(&mut self) {
        let status = self.state.status;
        if self.needs_announce(status) {
            self.announce(status).await;
        }
        if let Some(parent) = self.state.parent.clone() {
            if !self.ctx.stream.has_observation_for(parent.delegate_id).await {
                self.report_to_parent(&parent).await;
            }
        }
        info!(status = %status, last_error = ?self.state.last_error, "Agent reached a terminal state");
        self.done = true;
    }

    async fn report_to_parent(&mut self, parent: &ParentLink) {
        let (message, task_completed) = self.final_report();
        let depth = {
            let mut stack = self.ctx.stack.lock().await;
            let depth = stack.depth();
            match stack.pop(parent.delegate_id) {
                Ok(frame) => frame.depth,
                Err(e) => {
                    warn!(error = %e, "Delegation frame out of order");
                    depth
                }
            }
        };

        let name = self.name();
        if self.ctx.control.agent_switch_logging {
            self.audit(SwitchPhase::Pop, &name, &parent.agent, depth, parent.delegate_id)
                .await;
        }

        info!(parent = %parent.agent, task_completed, "Returning control to parent agent");
        let answer = Observation::Delegate {
            agent: name.clone(),
            message,
            task_completed,
        };
        let new = NewEvent::observation(EventSource::Agent, name, parent.delegate_id, answer);
        self.answer(new).await;
    }

    /// Final message handed to the parent and whether the task was completed
    fn final_report(&self) -> (String, bool) {
        match self.state.status {
            AgentStatus::Finished => {
                let message = self
                    .state
                    .view()
                    .events()
                    .iter()
                    .rev()
                    .find_map(|event| match event.as_action() {
                        Some(Action::Finish {
                            message,
                            task_completed: true,
                        }) => Some(message.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                (message, true)
            }
            status => {
                let message = match &self.state.last_error {
                    Some(error) => format!("{}: {}", status, error),
                    None => status.to_string(),
                };
                (message, false)
            }
        }
    }

    async fn reject_denied(&mut self, confirmation_id: EventId) {
        let decision = self.ctx.stream.event(confirmation_id).await;
        let reason = match decision.as_deref().and_then(Event::as_observation) {
            Some(Observation::Confirmation {
                reason: Some(reason),
                ..
            }) => format!("user denied the action: {}", reason),
            _ => "user denied the action".to_string(),
        };
        info!(confirmation_id, "Confirmation denied; rejecting");
        let new = NewEvent::observation(
            EventSource::Environment,
            self.name(),
            confirmation_id,
            Observation::Reject {
                code: RejectCode::UserDenied,
                reason,
            },
        );
        self.answer(new).await;
    }

    /// Starts (or, after a restart, restores) the child of a pending
    /// `Delegate` action
    async fn delegate(&mut self) {
        if self.child.is_some() {
            return;
        }
        let Some(pending) = self.state.pending_action.clone() else {
            return;
        };
        let Action::Delegate {
            agent: child_name,
            inputs,
        } = pending.action
        else {
            return;
        };
        let delegate_id = pending.id;
        if self.ctx.stream.has_observation_for(delegate_id).await {
            return;
        }

        let name = self.name();
        if let Err((code, reason)) = self.may_delegate_to(&child_name) {
            warn!(child = %child_name, reason = %reason, "Delegation rejected");
            let new = NewEvent::observation(
                EventSource::Environment,
                name,
                delegate_id,
                Observation::Reject { code, reason },
            );
            self.answer(new).await;
            return;
        }

        let depth = {
            let mut stack = self.ctx.stack.lock().await;
            let existing = stack
                .frames()
                .iter()
                .find(|frame| frame.delegate_id == Some(delegate_id))
                .map(|frame| frame.depth);
            match existing {
                Some(depth) => depth,
                None => stack.push(child_name.clone(), delegate_id),
            }
        };
        if self.ctx.control.agent_switch_logging {
            self.audit(SwitchPhase::Push, &name, &child_name, depth, delegate_id)
                .await;
        }
        if self.done {
            return;
        }

        let parent = ParentLink {
            agent: name,
            delegate_id,
        };
        match AgentController::child(Arc::clone(&self.ctx), &child_name, parent, inputs) {
            Ok(child) => {
                info!(child = %child_name, depth, delegate_id, "Delegating to child agent");
                self.child = Some(child.spawn());
            }
            Err(e) => {
                error!(child = %child_name, error = %e, "Could not start child agent");
                if let Err(e) = self.ctx.stack.lock().await.pop(delegate_id) {
                    warn!(error = %e, "Could not pop delegation frame");
                }
                let new = NewEvent::observation(
                    EventSource::Environment,
                    self.name(),
                    delegate_id,
                    Observation::Reject {
                        code: RejectCode::UnknownAgent,
                        reason: e.to_string(),
                    },
                );
                self.answer(new).await;
            }
        }
    }

    /// Records one side of an agent switch, once per delegation
    async fn audit(
        &mut self,
        phase: SwitchPhase,
        from: &str,
        to: &str,
        depth: usize,
        delegate_id: EventId,
    ) {
        let filter = EventFilter::all().subkind("agent_switch").cause(delegate_id);
        let recorded = self
            .ctx
            .stream
            .get_events(&filter, delegate_id, None)
            .await
            .iter()
            .any(|event| {
                matches!(
                    event.as_action(),
                    Some(Action::AgentSwitch { phase: seen, .. }) if *seen == phase
                )
            });
        if recorded {
            return;
        }

        info!(target: "crew::audit", from, to, phase = ?phase, depth, delegate_id, "Agent switch");
        let new = NewEvent::action(
            EventSource::Environment,
            self.name(),
            Action::AgentSwitch {
                from: from.to_string(),
                to: to.to_string(),
                phase,
                depth,
            },
        )
        .with_cause(delegate_id);
        self.append(new).await;
    }

    async fn maybe_step(&mut self) {
        if self.step.is_some()
            || self.state.pending_action.is_some()
            || self.state.pending_confirmation.is_some()
        {
            return;
        }
        if !self.ctx.stack.lock().await.is_top(self.delegate_id()) {
            return;
        }
        if self.check_stuck().await {
            return;
        }
        self.spawn_step();
    }

    /// Applies the stuck policy if the view shows a loop. True if it fired.
    async fn check_stuck(&mut self) -> bool {
        match self.detector.check(&self.state.view()) {
            Some(pattern) => {
                self.on_stuck(pattern).await;
                true
            }
            None => false,
        }
    }

    async fn on_stuck(&mut self, pattern: StuckPattern) {
        let policy = self.ctx.control.stuck_policy;
        warn!(pattern = %pattern, policy = ?policy, "Agent appears stuck");
        let action = match policy {
            StuckPolicy::Abort => Action::Error {
                kind: ErrorKind::Stuck,
                message: STUCK_MESSAGE.to_string(),
            },
            StuckPolicy::Continue => Action::Message {
                content: CORRECTIVE_MESSAGE.to_string(),
            },
        };
        let new = NewEvent::action(EventSource::Environment, self.name(), action);
        self.append(new).await;
    }

    fn spawn_step(&mut self) {
        let agent = Arc::clone(&self.agent);
        let name = self.name();
        let task = self.state.task.clone();
        let events = self.state.view().events().to_vec();
        debug!(view_events = events.len(), "Starting agent step");

        self.step = Some(tokio::spawn(async move {
            let view = HistoryView::new(&name, task.as_ref(), &events);
            agent.step(&view).await
        }));
    }

    fn abort_step(&mut self) {
        if let Some(step) = self.step.take() {
            debug!("Abandoning step in flight");
            step.abort();
        }
    }

    /// Routes a freshly chosen action through the delegation rules and the
    /// confirmation gate
    fn classify(&self, action: Action) -> Action {
        let reviewed = match &action {
            // A forbidden delegation is recorded as is and rejected
            Action::Delegate { agent, .. } => self.may_delegate_to(agent).is_ok(),
            other => other.is_runnable(),
        };
        if !reviewed {
            return action;
        }
        match self.ctx.gate.review(&action) {
            GateDecision::Auto => action,
            GateDecision::Confirm { reason } => {
                info!(subkind = action.subkind(), reason = %reason, "Action needs confirmation");
                Action::ConfirmationRequest {
                    action: Box::new(action),
                    reason,
                }
            }
        }
    }

    fn may_delegate_to(&self, child: &str) -> Result<(), (RejectCode, String)> {
        if !self.ctx.agents.contains(child) {
            return Err((
                RejectCode::UnknownAgent,
                EngineError::UnknownAgent(child.to_string()).to_string(),
            ));
        }
        if !self.ctx.matrix.allows(&self.state.agent_name, child) {
            return Err((
                RejectCode::DelegationNotAllowed,
                EngineError::DelegationNotAllowed {
                    from: self.state.agent_name.clone(),
                    to: child.to_string(),
                }
                .to_string(),
            ));
        }
        Ok(())
    }

    /// Closes a pending action with a synthetic error, then cancels it.
    /// Nothing happens if the real result landed first.
    async fn cancel_pending(&mut self, id: EventId, kind: ErrorKind, message: String) {
        let new = NewEvent::observation(
            EventSource::Environment,
            self.name(),
            id,
            Observation::Error { kind, message },
        );
        if self.answer(new).await.is_some() && self.ctx.runtime.cancel(id).await {
            debug!(event_id = id, "Runtime cancelled the action");
        }
    }

    fn needs_announce(&self, status: AgentStatus) -> bool {
        ANNOUNCED.contains(&status)
            && self.state.announced != Some(status)
            && self.announce_sent != Some(status)
    }

    async fn announce(&mut self, status: AgentStatus) {
        let new = NewEvent::notice(
            EventSource::Environment,
            self.name(),
            Observation::AgentStateChanged { state: status },
        );
        if self.append(new).await.is_some() {
            self.announce_sent = Some(status);
        }
    }

    async fn append(&mut self, new: NewEvent) -> Option<EventId> {
        let result = self.ctx.stream.append(new).await.map(Some);
        self.record(result)
    }

    /// Appends an observation answering an action, unless another answer
    /// got there first
    async fn answer(&mut self, new: NewEvent) -> Option<EventId> {
        let result = self.ctx.stream.append_answer(new).await;
        self.record(result)
    }

    fn record(&mut self, result: Result<Option<EventId>, EngineError>) -> Option<EventId> {
        match result {
            Ok(Some(id)) => {
                self.echo = self.echo.max(id);
                Some(id)
            }
            Ok(None) => None,
            Err(EngineError::StreamClosed) => {
                debug!("Event stream closed; controller stopping");
                self.done = true;
                None
            }
            Err(e) => {
                error!(error = %e, "Could not append event; controller stopping");
                self.done = true;
                None
            }
        }
    }

    fn name(&self) -> String {
        self.state.agent_name.clone()
    }
}
