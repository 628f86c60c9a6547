//! Agent state
//!
//! [`AgentState`] is a pure fold over the events an agent can see. The
//! controller feeds it live events one at a time; on resume the same fold
//! runs over the persisted log, so every flag (`iteration_flag`,
//! `budget_flag`, the status, the pending action) is reconstructed exactly.
//!
//! Visibility follows the delegation rules: once an agent appends a
//! `Delegate` action, every event up to the observation answering it belongs
//! to the child and is skipped. The parent sees one action and one
//! observation per delegation.

mod delegation;
mod view;

pub use delegation::{DelegationStack, Frame};
pub use view::HistoryView;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sdk::event::{
    Action, AgentStatus, DelegateInputs, ErrorKind, Event, EventBody, EventId, EventSource,
    Observation, RejectCode, StateChange,
};

/// An action dispatched but not yet observed
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: EventId,
    pub action: Action,
    pub dispatched_at: DateTime<Utc>,
}

/// A candidate action waiting for the user's decision
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    pub request_id: EventId,
    pub candidate: Action,
}

/// Child-to-parent link of a delegated agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub agent: String,
    pub delegate_id: EventId,
}

/// A status change produced by [`AgentState::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AgentStatus,
    pub to: AgentStatus,
}

/// Running context of one agent
#[derive(Debug, Clone)]
pub struct AgentState {
    pub session_id: String,
    pub agent_name: String,
    pub parent: Option<ParentLink>,
    /// Task handed over by the parent's `Delegate` action
    pub task: Option<DelegateInputs>,
    /// Number of LLM steps taken. Monitoring only.
    pub iteration_flag: u64,
    /// Accumulated LLM cost. Monitoring only.
    pub budget_flag: f64,
    /// First event id belonging to this agent's view
    pub history_cursor: EventId,
    pub pending_action: Option<PendingAction>,
    pub pending_confirmation: Option<PendingConfirmation>,
    /// Approved candidate that has not been appended yet
    pub approved_action: Option<Action>,
    /// Confirmation observation that denied the last request, until the
    /// matching `Reject` is recorded
    pub denied_by: Option<EventId>,
    pub last_error: Option<String>,
    pub status: AgentStatus,
    /// Status to restore when a pause ends
    pub resume_status: Option<AgentStatus>,
    /// Last status recorded through an `AgentStateChanged` event
    pub announced: Option<AgentStatus>,
    pub last_applied: EventId,
    view: Vec<Arc<Event>>,
    open_delegation: Option<EventId>,
}

impl AgentState {
    /// State of the session's root agent; it sees the whole log.
    pub fn root(session_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self::new(session_id.into(), agent_name.into(), None, None, 1)
    }

    /// State of a delegated agent; its view starts after the parent's
    /// `Delegate` action.
    pub fn child(
        session_id: impl Into<String>,
        agent_name: impl Into<String>,
        parent: ParentLink,
        task: DelegateInputs,
    ) -> Self {
        let cursor = parent.delegate_id + 1;
        let mut state = Self::new(
            session_id.into(),
            agent_name.into(),
            Some(parent),
            Some(task),
            cursor,
        );
        // A delegated agent starts working on its task right away
        state.status = AgentStatus::Running;
        state.last_applied = cursor - 1;
        state
    }

    fn new(
        session_id: String,
        agent_name: String,
        parent: Option<ParentLink>,
        task: Option<DelegateInputs>,
        history_cursor: EventId,
    ) -> Self {
        Self {
            session_id,
            agent_name,
            parent,
            task,
            iteration_flag: 0,
            budget_flag: 0.0,
            history_cursor,
            pending_action: None,
            pending_confirmation: None,
            approved_action: None,
            denied_by: None,
            last_error: None,
            status: AgentStatus::Loading,
            resume_status: None,
            announced: None,
            last_applied: history_cursor.saturating_sub(1),
            view: Vec::new(),
            open_delegation: None,
        }
    }

    /// `Loading -> Init` once replay is complete. Restored states keep the
    /// status the replay produced.
    pub fn finish_loading(&mut self) -> Option<Transition> {
        if self.status == AgentStatus::Loading {
            self.status = AgentStatus::Init;
            return Some(Transition {
                from: AgentStatus::Loading,
                to: AgentStatus::Init,
            });
        }
        None
    }

    pub fn view(&self) -> HistoryView<'_> {
        HistoryView::new(&self.agent_name, self.task.as_ref(), &self.view)
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Id of the delegation this agent is waiting on, if any
    pub fn open_delegation(&self) -> Option<EventId> {
        self.open_delegation
    }

    /// Closing a state requires that nothing is in flight
    pub fn can_close(&self) -> bool {
        self.pending_action.is_none()
    }

    /// Whether the event at `id` belongs to the view at all. Events inside a
    /// child's delegation window are skipped.
    fn admit(&mut self, event: &Event) -> bool {
        if let Some(delegate_id) = self.open_delegation {
            if event.answers(delegate_id) {
                self.open_delegation = None;
                return true;
            }
            return false;
        }
        true
    }

    /// Folds one event into the state.
    ///
    /// Events at or before `last_applied` are ignored, which makes delivery
    /// retries harmless. Returns the status change, if any.
    pub fn apply(&mut self, event: &Arc<Event>) -> Option<Transition> {
        if event.id <= self.last_applied || event.id < self.history_cursor {
            return None;
        }
        self.last_applied = event.id;
        if !self.admit(event) {
            return None;
        }
        self.view.push(Arc::clone(event));

        if let Some(metrics) = event.llm_metrics {
            self.iteration_flag += 1;
            self.budget_flag += metrics.cost;
        }

        let from = self.status;
        let announced = match &event.body {
            EventBody::Action(action) => {
                self.apply_action(event, action);
                false
            }
            EventBody::Observation(Observation::AgentStateChanged { state }) => {
                self.set_status(*state);
                self.announced = Some(*state);
                true
            }
            EventBody::Observation(observation) => {
                self.apply_observation(event, observation);
                false
            }
        };

        if self.status == from {
            return None;
        }
        if !announced {
            self.announced = None;
        }
        Some(Transition {
            from,
            to: self.status,
        })
    }

    fn apply_action(&mut self, event: &Event, action: &Action) {
        match (event.source, action) {
            (EventSource::User, Action::Message { .. }) => match self.status {
                AgentStatus::Loading
                | AgentStatus::Init
                | AgentStatus::AwaitingUserInput
                | AgentStatus::Running => {
                    self.status = AgentStatus::Running;
                }
                AgentStatus::Paused => {
                    if matches!(
                        self.resume_status,
                        Some(AgentStatus::Init | AgentStatus::AwaitingUserInput)
                    ) {
                        self.resume_status = Some(AgentStatus::Running);
                    }
                }
                _ => {}
            },
            (_, Action::ChangeAgentState { change }) => self.apply_change(*change),
            (EventSource::Agent, Action::Message { .. }) => {
                self.set_status(AgentStatus::AwaitingUserInput);
            }
            (EventSource::Agent, Action::Delegate { .. }) => {
                self.approved_action = None;
                self.pending_action = Some(PendingAction {
                    id: event.id,
                    action: action.clone(),
                    dispatched_at: event.timestamp,
                });
                self.open_delegation = Some(event.id);
                self.set_status(AgentStatus::Delegating);
            }
            (EventSource::Agent, action) if action.is_runnable() => {
                self.approved_action = None;
                self.pending_action = Some(PendingAction {
                    id: event.id,
                    action: action.clone(),
                    dispatched_at: event.timestamp,
                });
            }
            (EventSource::Agent, Action::ConfirmationRequest { action, .. }) => {
                self.pending_confirmation = Some(PendingConfirmation {
                    request_id: event.id,
                    candidate: action.as_ref().clone(),
                });
                self.set_status(AgentStatus::AwaitingConfirmation);
            }
            (_, Action::Finish { task_completed, .. }) => {
                if *task_completed {
                    self.set_status(AgentStatus::Finished);
                }
            }
            (_, Action::Reject { reason }) => {
                self.last_error = Some(reason.clone());
                self.set_status(AgentStatus::Rejected);
            }
            (_, Action::Error { kind, message }) => {
                self.last_error = Some(message.clone());
                if *kind == ErrorKind::Stuck {
                    self.set_status(AgentStatus::Stuck);
                } else {
                    self.set_status(AgentStatus::Errored);
                }
            }
            _ => {}
        }
    }

    fn apply_observation(&mut self, event: &Event, observation: &Observation) {
        if let Observation::Error { message, .. } = observation {
            self.last_error = Some(message.clone());
        }

        let answers_pending = self
            .pending_action
            .as_ref()
            .map_or(false, |pending| event.answers(pending.id));
        if answers_pending {
            let resolved = self.pending_action.take();
            if let Some(PendingAction {
                action: Action::Delegate { .. },
                ..
            }) = resolved
            {
                self.end_delegation();
            }
            return;
        }

        let answers_confirmation = self
            .pending_confirmation
            .as_ref()
            .map_or(false, |pending| event.answers(pending.request_id));
        if answers_confirmation {
            if let (Some(pending), Observation::Confirmation { approved, .. }) =
                (self.pending_confirmation.take(), observation)
            {
                if *approved {
                    self.approved_action = Some(pending.candidate);
                    self.leave(AgentStatus::AwaitingConfirmation, AgentStatus::Running);
                } else {
                    self.denied_by = Some(event.id);
                }
            }
            return;
        }

        if let Observation::Reject {
            code: RejectCode::UserDenied,
            reason,
        } = observation
        {
            if self.denied_by.is_some() && self.denied_by == event.cause_id {
                self.denied_by = None;
                self.last_error = Some(reason.clone());
                self.set_status(AgentStatus::Rejected);
            }
        }
    }

    fn apply_change(&mut self, change: StateChange) {
        match change {
            StateChange::Pause => {
                if !self.status.is_terminal() && self.status != AgentStatus::Paused {
                    self.resume_status = Some(self.status);
                    self.status = AgentStatus::Paused;
                }
            }
            StateChange::Resume => {
                if self.status == AgentStatus::Paused {
                    self.status = self.resume_status.take().unwrap_or(AgentStatus::Running);
                }
            }
        }
    }

    fn end_delegation(&mut self) {
        self.leave(AgentStatus::Delegating, AgentStatus::Running);
    }

    /// Moves `from -> to`, also when the move happens while paused.
    fn leave(&mut self, from: AgentStatus, to: AgentStatus) {
        if self.status == from {
            self.status = to;
        } else if self.status == AgentStatus::Paused && self.resume_status == Some(from) {
            self.resume_status = Some(to);
        }
    }

    fn set_status(&mut self, status: AgentStatus) {
        if self.status.is_terminal() || self.status == status {
            return;
        }
        if status == AgentStatus::Paused {
            self.resume_status = Some(self.status);
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::event::{LlmMetrics, NewEvent};

    struct Log {
        events: Vec<Arc<Event>>,
    }

    impl Log {
        fn new() -> Self {
            Self { events: Vec::new() }
        }

        fn push(&mut self, new: NewEvent) -> Arc<Event> {
            let id = self.events.len() as EventId + 1;
            let event = Arc::new(Event::seal(new, id, Utc::now()).unwrap());
            self.events.push(Arc::clone(&event));
            event
        }

        fn fold(&self, state: &mut AgentState) {
            for event in &self.events {
                state.apply(event);
            }
        }
    }

    fn agent(action: Action) -> NewEvent {
        NewEvent::action(EventSource::Agent, "root", action)
    }

    fn env(cause: EventId, observation: Observation) -> NewEvent {
        NewEvent::observation(EventSource::Environment, "root", cause, observation)
    }

    fn run(command: &str) -> Action {
        Action::CmdRun {
            command: command.to_string(),
        }
    }

    #[test]
    fn test_single_step_lifecycle() {
        let mut state = AgentState::root("s", "root");
        assert_eq!(
            state.finish_loading(),
            Some(Transition {
                from: AgentStatus::Loading,
                to: AgentStatus::Init
            })
        );

        let mut log = Log::new();
        let msg = log.push(NewEvent::user_message("root", "echo hi"));
        assert_eq!(state.apply(&msg).unwrap().to, AgentStatus::Running);

        let action = log.push(agent(run("echo hi")).with_metrics(Some(LlmMetrics {
            prompt_tokens: 10,
            completion_tokens: 5,
            cost: 0.25,
        })));
        assert!(state.apply(&action).is_none());
        assert_eq!(state.pending_action.as_ref().unwrap().id, 2);

        let output = log.push(env(
            2,
            Observation::CmdOutput {
                output: "hi\n".to_string(),
                exit_code: 0,
            },
        ));
        state.apply(&output);
        assert!(state.pending_action.is_none());
        assert_eq!(state.status, AgentStatus::Running);

        let finish = log.push(agent(Action::Finish {
            message: "done".to_string(),
            task_completed: true,
        }));
        assert_eq!(state.apply(&finish).unwrap().to, AgentStatus::Finished);
        assert!(state.can_close());
        assert_eq!(state.iteration_flag, 1);
        assert_eq!(state.budget_flag, 0.25);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        let msg = log.push(NewEvent::user_message("root", "hi"));
        let action = log.push(agent(run("ls")).with_metrics(Some(LlmMetrics::default())));

        state.apply(&msg);
        state.apply(&action);
        state.apply(&action);
        state.apply(&msg);
        assert_eq!(state.iteration_flag, 1);
        assert_eq!(state.view().events().len(), 2);
    }

    #[test]
    fn test_interim_finish_keeps_running() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "go"));
        log.push(agent(Action::Finish {
            message: "half way".to_string(),
            task_completed: false,
        }));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Running);
    }

    #[test]
    fn test_delegation_window_collapsed() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "fix it"));
        let delegate = log.push(agent(Action::Delegate {
            agent: "debug".to_string(),
            inputs: DelegateInputs {
                task: "fix test".to_string(),
                completion_criteria: "all green".to_string(),
                requirements: None,
                context: None,
            },
        }));
        log.push(NewEvent::action(EventSource::Agent, "debug", run("cargo test")));
        log.push(NewEvent::observation(
            EventSource::Environment,
            "debug",
            3,
            Observation::CmdOutput {
                output: "ok".to_string(),
                exit_code: 0,
            },
        ));
        log.push(NewEvent::action(
            EventSource::Agent,
            "debug",
            Action::Finish {
                message: "green".to_string(),
                task_completed: true,
            },
        ));

        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Delegating);
        assert_eq!(state.open_delegation(), Some(delegate.id));
        assert_eq!(state.view().events().len(), 2);

        log.push(NewEvent::observation(
            EventSource::Agent,
            "debug",
            delegate.id,
            Observation::Delegate {
                agent: "debug".to_string(),
                message: "green".to_string(),
                task_completed: true,
            },
        ));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Running);
        assert!(state.pending_action.is_none());
        let ids: Vec<_> = state.view().events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 6]);
    }

    #[test]
    fn test_child_view_starts_after_delegate() {
        let parent = ParentLink {
            agent: "root".to_string(),
            delegate_id: 2,
        };
        let task = DelegateInputs {
            task: "t".to_string(),
            completion_criteria: "c".to_string(),
            requirements: None,
            context: None,
        };
        let mut child = AgentState::child("s", "debug", parent, task);
        assert_eq!(child.status, AgentStatus::Running);
        assert_eq!(child.history_cursor, 3);

        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "go"));
        log.push(agent(run("should not be seen")));
        log.push(NewEvent::action(EventSource::Agent, "debug", run("ls")));
        log.fold(&mut child);
        assert_eq!(child.view().events().len(), 1);
        assert_eq!(child.pending_action.as_ref().unwrap().id, 3);
    }

    #[test]
    fn test_confirmation_denied_then_rejected() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "clean up"));
        log.push(agent(Action::ConfirmationRequest {
            action: Box::new(run("rm -rf build")),
            reason: "destructive command".to_string(),
        }));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::AwaitingConfirmation);

        log.push(env(
            2,
            Observation::Confirmation {
                approved: false,
                reason: None,
            },
        ));
        log.fold(&mut state);
        assert_eq!(state.denied_by, Some(3));
        assert_eq!(state.status, AgentStatus::AwaitingConfirmation);

        log.push(env(
            3,
            Observation::Reject {
                code: RejectCode::UserDenied,
                reason: "user denied".to_string(),
            },
        ));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Rejected);
    }

    #[test]
    fn test_confirmation_approved_holds_candidate() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "clean up"));
        log.push(agent(Action::ConfirmationRequest {
            action: Box::new(run("rm -rf build")),
            reason: "destructive command".to_string(),
        }));
        log.push(env(
            2,
            Observation::Confirmation {
                approved: true,
                reason: None,
            },
        ));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.approved_action, Some(run("rm -rf build")));

        log.push(agent(run("rm -rf build")));
        log.fold(&mut state);
        assert!(state.approved_action.is_none());
        assert_eq!(state.pending_action.as_ref().unwrap().id, 4);
    }

    #[test]
    fn test_pause_and_resume_restore_prior_state() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "go"));
        log.push(NewEvent::action(
            EventSource::User,
            "root",
            Action::ChangeAgentState {
                change: StateChange::Pause,
            },
        ));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Paused);
        assert_eq!(state.resume_status, Some(AgentStatus::Running));

        log.push(NewEvent::action(
            EventSource::User,
            "root",
            Action::ChangeAgentState {
                change: StateChange::Resume,
            },
        ));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Running);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "go"));
        log.push(agent(Action::Error {
            kind: ErrorKind::Stuck,
            message: "detected repetition pattern; aborting.".to_string(),
        }));
        log.push(NewEvent::user_message("root", "again"));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::Stuck);
        assert_eq!(
            state.last_error.as_deref(),
            Some("detected repetition pattern; aborting.")
        );
    }

    #[test]
    fn test_state_changed_event_recorded_as_announced() {
        let mut state = AgentState::root("s", "root");
        state.finish_loading();
        let mut log = Log::new();
        log.push(NewEvent::user_message("root", "go"));
        log.push(env(
            1,
            Observation::AgentStateChanged {
                state: AgentStatus::AwaitingUserInput,
            },
        ));
        log.fold(&mut state);
        assert_eq!(state.status, AgentStatus::AwaitingUserInput);
        assert_eq!(state.announced, Some(AgentStatus::AwaitingUserInput));
    }
}
