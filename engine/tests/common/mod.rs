//! Shared fixtures for the integration tests: scripted agents and runtimes
//! that make controller runs deterministic.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crew_engine::agent::{Agent, AgentRegistry, StepOutcome};
use crew_engine::config::{AgentConfig, Config};
use crew_engine::confirmation::{Confirmer, Decision, FixedConfirmer};
use crew_engine::session::{Session, SessionServices};
use crew_engine::state::HistoryView;
use sdk::event::{Action, DelegateInputs, Event, EventId, LlmMetrics, Observation};
use sdk::runtime::Runtime;

/// Metrics attached to every scripted step
pub const STEP_METRICS: LlmMetrics = LlmMetrics {
    prompt_tokens: 100,
    completion_tokens: 20,
    cost: 0.01,
};

/// Plays back a fixed list of actions, one per step, and records the view
/// it was shown each time
pub struct ScriptedAgent {
    name: String,
    script: Mutex<VecDeque<Action>>,
    views: Mutex<Vec<Vec<Arc<Event>>>>,
}

impl ScriptedAgent {
    pub fn new(name: &str, script: Vec<Action>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            views: Mutex::new(Vec::new()),
        })
    }

    /// Views seen by each step, oldest first
    pub fn views(&self) -> Vec<Vec<Arc<Event>>> {
        self.views.lock().unwrap().clone()
    }

    pub fn steps(&self) -> usize {
        self.views.lock().unwrap().len()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn step(&self, view: &HistoryView<'_>) -> StepOutcome {
        self.views.lock().unwrap().push(view.events().to_vec());
        let next = self.script.lock().unwrap().pop_front();
        let action = next.unwrap_or_else(|| Action::Message {
            content: "nothing left to do".to_string(),
        });
        StepOutcome::new(action).with_metrics(STEP_METRICS)
    }
}

/// `echo X` prints `X`, `sleep N` takes N seconds, `sleepms N` takes N
/// milliseconds, anything else succeeds
/// with a fixed output. Cancellation is recorded but does not stop the
/// command, so late results can be observed.
#[derive(Default)]
pub struct ScriptedRuntime {
    executed: Mutex<Vec<EventId>>,
    cancelled: Mutex<Vec<EventId>>,
}

impl ScriptedRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn executed(&self) -> Vec<EventId> {
        self.executed.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<EventId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, action_id: EventId, action: &Action) -> Observation {
        self.executed.lock().unwrap().push(action_id);
        let Action::CmdRun { command } = action else {
            return Observation::Think {
                content: "ok".to_string(),
            };
        };

        if let Some(text) = command.strip_prefix("echo ") {
            return Observation::CmdOutput {
                output: format!("{}\n", text),
                exit_code: 0,
            };
        }
        let delay = if let Some(secs) = command.strip_prefix("sleep ") {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        } else if let Some(millis) = command.strip_prefix("sleepms ") {
            millis.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            None
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            return Observation::CmdOutput {
                output: String::new(),
                exit_code: 0,
            };
        }
        Observation::CmdOutput {
            output: format!("output of {}\n", command),
            exit_code: 0,
        }
    }

    async fn cancel(&self, action_id: EventId) -> bool {
        self.cancelled.lock().unwrap().push(action_id);
        true
    }
}

fn agent_config(description: &str, allowlist: &[&str]) -> AgentConfig {
    AgentConfig {
        description: description.to_string(),
        delegation_allowlist: allowlist.iter().map(|name| name.to_string()).collect(),
        ..AgentConfig::default()
    }
}

/// Orchestrator may delegate to debugger, debugger to tester. `outsider` is
/// registered but nobody may delegate to it. Memory is off so event ids are
/// predictable.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default_config();
    config.core.workspace = root.to_path_buf();
    config.core.session_root = root.join("sessions");
    config.core.memory_enabled = false;

    let mut agents = BTreeMap::new();
    agents.insert(
        "orchestrator".to_string(),
        agent_config("Plans and delegates", &["debugger"]),
    );
    agents.insert(
        "debugger".to_string(),
        agent_config("Fixes failures", &["tester"]),
    );
    agents.insert("tester".to_string(), agent_config("Runs tests", &[]));
    agents.insert("outsider".to_string(), agent_config("Not reachable", &[]));
    config.agents = agents;
    config.delegation = BTreeMap::new();
    config
}

pub fn registry(agents: &[Arc<ScriptedAgent>]) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.insert(Arc::clone(agent) as Arc<dyn Agent>);
    }
    // Every configured agent must be resolvable
    for name in ["orchestrator", "debugger", "tester", "outsider"] {
        if !registry.contains(name) {
            registry.insert(ScriptedAgent::new(name, Vec::new()) as Arc<dyn Agent>);
        }
    }
    registry
}

/// Never decides; the request stays open for as long as the test runs
pub struct SilentConfirmer;

#[async_trait]
impl Confirmer for SilentConfirmer {
    async fn decide(&self, _agent: &str, _candidate: &Action, _reason: &str) -> Decision {
        std::future::pending().await
    }
}

/// Waits in a step until the controller abandons it
pub struct HangingAgent {
    name: String,
}

impl HangingAgent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Agent for HangingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn step(&self, _view: &HistoryView<'_>) -> StepOutcome {
        std::future::pending().await
    }
}

pub fn services(agents: &[Arc<ScriptedAgent>], runtime: Arc<ScriptedRuntime>) -> SessionServices {
    SessionServices {
        agents: registry(agents),
        runtime,
        confirmer: Arc::new(FixedConfirmer::approving()),
    }
}

pub async fn start(
    config: &Config,
    agents: &[Arc<ScriptedAgent>],
    runtime: Arc<ScriptedRuntime>,
) -> Session {
    Session::start(config, services(agents, runtime))
        .await
        .unwrap()
}

pub fn run(command: &str) -> Action {
    Action::CmdRun {
        command: command.to_string(),
    }
}

pub fn finish(message: &str, task_completed: bool) -> Action {
    Action::Finish {
        message: message.to_string(),
        task_completed,
    }
}

pub fn delegate(agent: &str, task: &str, completion_criteria: &str) -> Action {
    Action::Delegate {
        agent: agent.to_string(),
        inputs: DelegateInputs {
            task: task.to_string(),
            completion_criteria: completion_criteria.to_string(),
            requirements: None,
            context: None,
        },
    }
}

pub fn ids(events: &[Arc<Event>]) -> Vec<EventId> {
    events.iter().map(|event| event.id).collect()
}

/// Observations answering `action_id`
pub fn answers(events: &[Arc<Event>], action_id: EventId) -> Vec<Arc<Event>> {
    events
        .iter()
        .filter(|event| event.answers(action_id))
        .cloned()
        .collect()
}
