//! Event model
//!
//! Every interaction in a session is an [`Event`]: either an [`Action`]
//! (intent, e.g. "run this command") or an [`Observation`] (a result, e.g.
//! "stdout and exit code"). Events are appended to the event stream, which
//! assigns the id and timestamp; after that they are never mutated.
//!
//! # Wire format
//!
//! Each event serializes to a flat JSON object:
//!
//! ```json
//! {"id":3,"kind":"observation","subkind":"cmd_output","source":"environment",
//!  "timestamp":"2026-10-16T10:00:00Z","cause_id":2,"agent":"orchestrator",
//!  "llm_metrics":null,"payload":{"output":"hi\n","exit_code":0}}
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;

/// Dense, strictly increasing event identifier. The first event is `1`.
pub type EventId = u64;

/// Whether an event declares intent or records a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Action,
    Observation,
}

/// Who produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    User,
    Agent,
    Environment,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::User => "user",
            EventSource::Agent => "agent",
            EventSource::Environment => "environment",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a failure carried by an `Error` action or observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An action exceeded the action timeout and was cancelled
    Timeout,
    /// An in-flight action was cancelled by a user pause
    Cancelled,
    /// A tool failed while executing an action
    Tool,
    /// The LLM provider failed after all retries
    Llm,
    /// The LLM reply could not be mapped to an action
    Parse,
    /// A runtime failed internally
    Runtime,
    /// A stream subscriber failed repeatedly and was removed
    Subscriber,
    /// The stuck detector aborted the agent
    Stuck,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Tool => "tool",
            ErrorKind::Llm => "llm",
            ErrorKind::Parse => "parse",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Subscriber => "subscriber",
            ErrorKind::Stuck => "stuck",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code carried by a `Reject` observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// The delegation matrix forbids the requested hand-off
    DelegationNotAllowed,
    /// The requested child agent is not registered
    UnknownAgent,
    /// The user denied a confirmation request
    UserDenied,
}

/// Pause/resume request posted by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChange {
    Pause,
    Resume,
}

/// Direction of an agent switch audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPhase {
    Push,
    Pop,
}

/// Lifecycle state of one agent controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Loading,
    Init,
    Running,
    AwaitingUserInput,
    AwaitingConfirmation,
    Paused,
    Delegating,
    Finished,
    Rejected,
    Errored,
    Stuck,
}

impl AgentStatus {
    /// Terminal states end the controller.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Finished | AgentStatus::Rejected | AgentStatus::Errored | AgentStatus::Stuck
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Loading => "loading",
            AgentStatus::Init => "init",
            AgentStatus::Running => "running",
            AgentStatus::AwaitingUserInput => "awaiting_user_input",
            AgentStatus::AwaitingConfirmation => "awaiting_confirmation",
            AgentStatus::Paused => "paused",
            AgentStatus::Delegating => "delegating",
            AgentStatus::Finished => "finished",
            AgentStatus::Rejected => "rejected",
            AgentStatus::Errored => "errored",
            AgentStatus::Stuck => "stuck",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| EngineError::InvalidEvent(format!("unknown agent state '{}'", s)))
    }
}

/// Inputs of the `delegate` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateInputs {
    pub task: String,
    pub completion_criteria: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Intent declared by a user, an agent or the environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subkind", content = "payload", rename_all = "snake_case")]
pub enum Action {
    /// Free text. From the user it is a new request, from an agent it is a
    /// question or answer directed at the user.
    Message { content: String },
    CmdRun { command: String },
    FileRead { path: String },
    /// Creates or overwrites `path` when `old_str` is absent, otherwise
    /// replaces the single occurrence of `old_str`.
    FileEdit {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_str: Option<String>,
        new_str: String,
    },
    Think { thought: String },
    Browse { url: String },
    Delegate { agent: String, inputs: DelegateInputs },
    Finish { message: String, task_completed: bool },
    Reject { reason: String },
    Error { kind: ErrorKind, message: String },
    /// A candidate action held back until the user decides
    ConfirmationRequest { action: Box<Action>, reason: String },
    ChangeAgentState { change: StateChange },
    /// Audit record of a delegation push or pop
    AgentSwitch {
        from: String,
        to: String,
        phase: SwitchPhase,
        depth: usize,
    },
}

impl Action {
    pub fn subkind(&self) -> &'static str {
        match self {
            Action::Message { .. } => "message",
            Action::CmdRun { .. } => "cmd_run",
            Action::FileRead { .. } => "file_read",
            Action::FileEdit { .. } => "file_edit",
            Action::Think { .. } => "think",
            Action::Browse { .. } => "browse",
            Action::Delegate { .. } => "delegate",
            Action::Finish { .. } => "finish",
            Action::Reject { .. } => "reject",
            Action::Error { .. } => "error",
            Action::ConfirmationRequest { .. } => "confirmation_request",
            Action::ChangeAgentState { .. } => "change_agent_state",
            Action::AgentSwitch { .. } => "agent_switch",
        }
    }

    /// Actions a runtime executes and answers with exactly one observation
    pub fn is_runnable(&self) -> bool {
        matches!(
            self,
            Action::CmdRun { .. }
                | Action::FileRead { .. }
                | Action::FileEdit { .. }
                | Action::Think { .. }
                | Action::Browse { .. }
        )
    }

    /// Runnable actions that cannot change the workspace
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Action::FileRead { .. } | Action::Think { .. } | Action::Browse { .. }
        )
    }

    /// Finish, Reject and Error are absorbed by the controller
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Action::Finish { .. } | Action::Reject { .. } | Action::Error { .. }
        )
    }

    /// Short human readable description used in prompts and logs
    pub fn summary(&self) -> String {
        match self {
            Action::Message { content } => content.clone(),
            Action::CmdRun { command } => format!("run `{}`", command),
            Action::FileRead { path } => format!("read {}", path),
            Action::FileEdit { path, old_str, .. } => match old_str {
                Some(_) => format!("edit {}", path),
                None => format!("write {}", path),
            },
            Action::Think { thought } => format!("think: {}", thought),
            Action::Browse { url } => format!("browse {}", url),
            Action::Delegate { agent, inputs } => {
                format!("delegate to {}: {}", agent, inputs.task)
            }
            Action::Finish {
                message,
                task_completed,
            } => format!("finish (completed={}): {}", task_completed, message),
            Action::Reject { reason } => format!("reject: {}", reason),
            Action::Error { kind, message } => format!("error ({}): {}", kind, message),
            Action::ConfirmationRequest { action, reason } => {
                format!("confirm {}? ({})", action.summary(), reason)
            }
            Action::ChangeAgentState { change } => format!("{:?}", change).to_lowercase(),
            Action::AgentSwitch {
                from, to, phase, ..
            } => format!("{:?} {} -> {}", phase, from, to).to_lowercase(),
        }
    }
}

/// Result recorded in response to an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subkind", content = "payload", rename_all = "snake_case")]
pub enum Observation {
    CmdOutput { output: String, exit_code: i32 },
    FileRead { path: String, content: String },
    FileEdit { path: String, summary: String },
    Think { content: String },
    Browse {
        url: String,
        status: u16,
        content: String,
    },
    /// A child agent's final summary, answering the parent's Delegate action
    Delegate {
        agent: String,
        message: String,
        task_completed: bool,
    },
    /// The user's answer to a ConfirmationRequest
    Confirmation {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Reject { code: RejectCode, reason: String },
    Error { kind: ErrorKind, message: String },
    AgentStateChanged { state: AgentStatus },
    /// Repository and runtime context gathered for prompts
    Recall {
        workspace: String,
        repo_info: String,
        runtime_info: String,
        #[serde(default)]
        knowledge: Vec<String>,
    },
}

impl Observation {
    pub fn subkind(&self) -> &'static str {
        match self {
            Observation::CmdOutput { .. } => "cmd_output",
            Observation::FileRead { .. } => "file_read",
            Observation::FileEdit { .. } => "file_edit",
            Observation::Think { .. } => "think",
            Observation::Browse { .. } => "browse",
            Observation::Delegate { .. } => "delegate",
            Observation::Confirmation { .. } => "confirmation",
            Observation::Reject { .. } => "reject",
            Observation::Error { .. } => "error",
            Observation::AgentStateChanged { .. } => "agent_state_changed",
            Observation::Recall { .. } => "recall",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Observation::Error { .. })
    }

    /// Text an LLM sees for this observation
    pub fn content(&self) -> String {
        match self {
            Observation::CmdOutput { output, exit_code } => {
                format!("{}\n[exit code: {}]", output, exit_code)
            }
            Observation::FileRead { content, .. } => content.clone(),
            Observation::FileEdit { summary, .. } => summary.clone(),
            Observation::Think { content } => content.clone(),
            Observation::Browse {
                status, content, ..
            } => format!("[HTTP {}]\n{}", status, content),
            Observation::Delegate {
                agent,
                message,
                task_completed,
            } => format!(
                "{} finished (task_completed={}): {}",
                agent, task_completed, message
            ),
            Observation::Confirmation { approved, reason } => {
                let verdict = if *approved { "approved" } else { "denied" };
                match reason {
                    Some(reason) => format!("user {}: {}", verdict, reason),
                    None => format!("user {}", verdict),
                }
            }
            Observation::Reject { code, reason } => format!("rejected ({:?}): {}", code, reason),
            Observation::Error { kind, message } => format!("error ({}): {}", kind, message),
            Observation::AgentStateChanged { state } => format!("agent state: {}", state),
            Observation::Recall {
                workspace,
                repo_info,
                runtime_info,
                knowledge,
            } => {
                let mut text = format!(
                    "Workspace: {}\n{}\n{}",
                    workspace, repo_info, runtime_info
                );
                for item in knowledge {
                    text.push_str("\n\n");
                    text.push_str(item);
                }
                text
            }
        }
    }
}

/// Body of an event
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Action(Action),
    Observation(Observation),
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Action(_) => EventKind::Action,
            EventBody::Observation(_) => EventKind::Observation,
        }
    }

    pub fn subkind(&self) -> &'static str {
        match self {
            EventBody::Action(action) => action.subkind(),
            EventBody::Observation(observation) => observation.subkind(),
        }
    }
}

/// Token usage and cost of the LLM call that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

/// An event before the stream has assigned its id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub body: EventBody,
    pub source: EventSource,
    pub cause_id: Option<EventId>,
    pub agent: String,
    pub llm_metrics: Option<LlmMetrics>,
}

impl NewEvent {
    pub fn action(source: EventSource, agent: impl Into<String>, action: Action) -> Self {
        Self {
            body: EventBody::Action(action),
            source,
            cause_id: None,
            agent: agent.into(),
            llm_metrics: None,
        }
    }

    pub fn observation(
        source: EventSource,
        agent: impl Into<String>,
        cause_id: EventId,
        observation: Observation,
    ) -> Self {
        Self {
            body: EventBody::Observation(observation),
            source,
            cause_id: Some(cause_id),
            agent: agent.into(),
            llm_metrics: None,
        }
    }

    /// An observation that answers no action, such as a state change notice
    pub fn notice(source: EventSource, agent: impl Into<String>, observation: Observation) -> Self {
        Self {
            body: EventBody::Observation(observation),
            source,
            cause_id: None,
            agent: agent.into(),
            llm_metrics: None,
        }
    }

    pub fn user_message(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self::action(
            EventSource::User,
            agent,
            Action::Message {
                content: content.into(),
            },
        )
    }

    pub fn with_cause(mut self, cause_id: EventId) -> Self {
        self.cause_id = Some(cause_id);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<LlmMetrics>) -> Self {
        self.llm_metrics = metrics;
        self
    }
}

/// Immutable record of one action or observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EventRecord", try_from = "EventRecord")]
pub struct Event {
    pub id: EventId,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub cause_id: Option<EventId>,
    pub agent: String,
    pub llm_metrics: Option<LlmMetrics>,
    pub body: EventBody,
}

impl Event {
    /// Seals a new event with its assigned id and timestamp.
    pub fn seal(new: NewEvent, id: EventId, timestamp: DateTime<Utc>) -> Result<Self, EngineError> {
        if let Some(cause_id) = new.cause_id {
            if cause_id >= id {
                return Err(EngineError::InvalidEvent(format!(
                    "cause_id {} must precede id {}",
                    cause_id, id
                )));
            }
        }
        Ok(Self {
            id,
            source: new.source,
            timestamp,
            cause_id: new.cause_id,
            agent: new.agent,
            llm_metrics: new.llm_metrics,
            body: new.body,
        })
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    pub fn subkind(&self) -> &'static str {
        self.body.subkind()
    }

    pub fn as_action(&self) -> Option<&Action> {
        match &self.body {
            EventBody::Action(action) => Some(action),
            EventBody::Observation(_) => None,
        }
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match &self.body {
            EventBody::Observation(observation) => Some(observation),
            EventBody::Action(_) => None,
        }
    }

    /// True for an observation answering the given action
    pub fn answers(&self, action_id: EventId) -> bool {
        self.kind() == EventKind::Observation && self.cause_id == Some(action_id)
    }
}

/// Flat on-disk representation of an [`Event`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventRecord {
    id: EventId,
    kind: EventKind,
    subkind: String,
    source: EventSource,
    timestamp: DateTime<Utc>,
    cause_id: Option<EventId>,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    llm_metrics: Option<LlmMetrics>,
    #[serde(default)]
    payload: Value,
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        let kind = event.kind();
        let subkind = event.subkind().to_string();
        let tagged = match &event.body {
            EventBody::Action(action) => serde_json::to_value(action),
            EventBody::Observation(observation) => serde_json::to_value(observation),
        };
        // Adjacently tagged enums always serialize to {"subkind", "payload"}.
        let payload = tagged
            .ok()
            .and_then(|mut value| value.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null);
        Self {
            id: event.id,
            kind,
            subkind,
            source: event.source,
            timestamp: event.timestamp,
            cause_id: event.cause_id,
            agent: event.agent,
            llm_metrics: event.llm_metrics,
            payload,
        }
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = EngineError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let tagged = serde_json::json!({
            "subkind": record.subkind,
            "payload": record.payload,
        });
        let body = match record.kind {
            EventKind::Action => EventBody::Action(serde_json::from_value(tagged)?),
            EventKind::Observation => EventBody::Observation(serde_json::from_value(tagged)?),
        };
        if let Some(cause_id) = record.cause_id {
            if cause_id >= record.id {
                return Err(EngineError::InvalidEvent(format!(
                    "event {} has cause_id {}",
                    record.id, cause_id
                )));
            }
        }
        Ok(Self {
            id: record.id,
            source: record.source,
            timestamp: record.timestamp,
            cause_id: record.cause_id,
            agent: record.agent,
            llm_metrics: record.llm_metrics,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(new: NewEvent, id: EventId) -> Event {
        Event::seal(new, id, Utc::now()).unwrap()
    }

    #[test]
    fn test_flat_wire_format() {
        let event = sealed(
            NewEvent::observation(
                EventSource::Environment,
                "orchestrator",
                2,
                Observation::CmdOutput {
                    output: "hi\n".to_string(),
                    exit_code: 0,
                },
            ),
            3,
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["kind"], "observation");
        assert_eq!(value["subkind"], "cmd_output");
        assert_eq!(value["source"], "environment");
        assert_eq!(value["cause_id"], 2);
        assert_eq!(value["payload"]["output"], "hi\n");
        assert_eq!(value["payload"]["exit_code"], 0);

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_same_subkind_resolved_by_kind() {
        let json = r#"{"id":5,"kind":"action","subkind":"file_read","source":"agent",
            "timestamp":"2026-10-16T10:00:00Z","cause_id":null,"payload":{"path":"a.txt"}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.as_action(),
            Some(&Action::FileRead {
                path: "a.txt".to_string()
            })
        );
        assert_eq!(event.agent, "");
    }

    #[test]
    fn test_cause_must_precede_id() {
        let new = NewEvent::user_message("root", "hello").with_cause(4);
        assert!(Event::seal(new, 4, Utc::now()).is_err());

        let json = r#"{"id":2,"kind":"observation","subkind":"think","source":"environment",
            "timestamp":"2026-10-16T10:00:00Z","cause_id":9,"payload":{"content":"ok"}}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }

    #[test]
    fn test_unknown_subkind_rejected() {
        let json = r#"{"id":1,"kind":"action","subkind":"teleport","source":"agent",
            "timestamp":"2026-10-16T10:00:00Z","cause_id":null,"payload":{}}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }

    #[test]
    fn test_delegate_payload_shape() {
        let action = Action::Delegate {
            agent: "debugger".to_string(),
            inputs: DelegateInputs {
                task: "fix test".to_string(),
                completion_criteria: "all green".to_string(),
                requirements: None,
                context: None,
            },
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["payload"]["agent"], "debugger");
        assert_eq!(value["payload"]["inputs"]["task"], "fix test");
        assert!(value["payload"]["inputs"].get("requirements").is_none());
    }

    #[test]
    fn test_action_classification() {
        let run = Action::CmdRun {
            command: "ls".to_string(),
        };
        assert!(run.is_runnable());
        assert!(!run.is_read_only());
        assert!(Action::Think {
            thought: "hmm".to_string()
        }
        .is_read_only());
        assert!(Action::Finish {
            message: "done".to_string(),
            task_completed: true
        }
        .is_terminal());
        assert!(!Action::Message {
            content: "hi".to_string()
        }
        .is_runnable());
    }

    #[test]
    fn test_status_parse_and_terminal() {
        let status: AgentStatus = "awaiting_user_input".parse().unwrap();
        assert_eq!(status, AgentStatus::AwaitingUserInput);
        assert!(!status.is_terminal());
        assert!(AgentStatus::Stuck.is_terminal());
        assert!("sleeping".parse::<AgentStatus>().is_err());
    }
}
