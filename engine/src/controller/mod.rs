//! Agent controller
//!
//! One [`AgentController`] drives one agent. It owns the agent's
//! [`AgentState`], folds every event of its view into it, and decides what
//! happens next: call the agent for a step, dispatch the chosen action, ask
//! for a confirmation, hand off to a child agent, or record the end of the
//! agent's run.
//!
//! # Control loop
//!
//! Each controller runs on its own task and processes, strictly one at a
//! time:
//!
//! 1. events delivered by the stream (through its [`Inbox`]),
//! 2. the result of the step in flight,
//! 3. the exit of its child controller,
//! 4. a periodic tick that enforces the action and inactivity timeouts.
//!
//! After every event the controller re-derives its follow-up work from the
//! state alone. The same derivation runs after replay, so a resumed session
//! continues exactly where the persisted log left off. Anything the
//! controller appends is folded back in before the next decision is taken.
//!
//! # Delegation
//!
//! A `Delegate` action pushes a frame on the shared [`DelegationStack`] and
//! spawns a child controller whose view starts right after the action. Only
//! the controller on top of the stack steps its agent. The child answers the
//! parent's `Delegate` action with a `Delegate` observation once it reaches
//! a terminal state, pops its frame, and exits.

mod dispatch;
mod inbox;

pub use inbox::{Inbox, InboxMessage, INBOX_CAPACITY};

use std::sync::Arc;

use sdk::errors::EngineError;
use sdk::event::{AgentStatus, DelegateInputs, Event, EventId};
use sdk::runtime::Runtime;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::agent::{Agent, AgentRegistry, StepOutcome};
use crate::config::{Config, ControlConfig, DelegationMatrix};
use crate::confirmation::ConfirmationGate;
use crate::state::{AgentState, DelegationStack, ParentLink};
use crate::stream::{EventFilter, EventStream};
use crate::stuck::StuckDetector;

/// The agent currently driven, as seen by the user interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAgent {
    pub agent: String,
    pub status: AgentStatus,
    /// Delegation depth; `0` is the session's root agent
    pub depth: usize,
}

impl ActiveAgent {
    /// The root agent reached a terminal state: the session is over.
    pub fn is_session_over(&self) -> bool {
        self.depth == 0 && self.status.is_terminal()
    }
}

/// Returned when a controller's loop ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerExit {
    pub agent: String,
    pub status: AgentStatus,
}

/// Everything controllers of one session share. Built once at session
/// start from the configuration and injected.
pub struct ControllerContext {
    pub stream: EventStream,
    pub agents: AgentRegistry,
    pub runtime: Arc<dyn Runtime>,
    pub matrix: DelegationMatrix,
    pub gate: ConfirmationGate,
    pub control: ControlConfig,
    pub stack: Mutex<DelegationStack>,
    /// Append a resume request when replay ends in `Paused`
    pub auto_resume: bool,
    active: watch::Sender<ActiveAgent>,
}

impl ControllerContext {
    pub fn new(
        stream: EventStream,
        agents: AgentRegistry,
        runtime: Arc<dyn Runtime>,
        config: &Config,
    ) -> Self {
        let root = config.core.root_agent.clone();
        let (active, _) = watch::channel(ActiveAgent {
            agent: root.clone(),
            status: AgentStatus::Loading,
            depth: 0,
        });
        Self {
            stream,
            agents,
            runtime,
            matrix: config.delegation_matrix(),
            gate: ConfirmationGate::from_config(&config.control),
            control: config.control.clone(),
            stack: Mutex::new(DelegationStack::new(root)),
            auto_resume: false,
            active,
        }
    }

    pub fn with_auto_resume(mut self, auto_resume: bool) -> Self {
        self.auto_resume = auto_resume;
        self
    }

    /// Follows the agent on top of the delegation stack
    pub fn watch_active(&self) -> watch::Receiver<ActiveAgent> {
        self.active.subscribe()
    }

    pub fn active(&self) -> ActiveAgent {
        self.active.borrow().clone()
    }
}

/// Drives one agent through its lifecycle
pub struct AgentController {
    ctx: Arc<ControllerContext>,
    state: AgentState,
    agent: Arc<dyn Agent>,
    detector: StuckDetector,
    subscriber: String,
    /// Highest id this controller appended; decisions wait until it is folded
    echo: EventId,
    /// Status whose `AgentStateChanged` was appended but not yet folded
    announce_sent: Option<AgentStatus>,
    step: Option<JoinHandle<StepOutcome>>,
    child: Option<JoinHandle<ControllerExit>>,
    /// Pending action id and when its timeout window started
    dispatch_clock: Option<(EventId, Instant)>,
    last_activity: Instant,
    warned_iterations: bool,
    warned_budget: bool,
    done: bool,
}

impl AgentController {
    /// Controller of the session's root agent
    pub fn root(ctx: Arc<ControllerContext>, agent_name: &str) -> Result<Self, EngineError> {
        let state = AgentState::root(ctx.stream.session_id(), agent_name);
        Self::new(ctx, state, format!("controller:{}", agent_name))
    }

    /// Controller of a delegated agent
    pub fn child(
        ctx: Arc<ControllerContext>,
        agent_name: &str,
        parent: ParentLink,
        task: DelegateInputs,
    ) -> Result<Self, EngineError> {
        let subscriber = format!("controller:{}:{}", agent_name, parent.delegate_id);
        let state = AgentState::child(ctx.stream.session_id(), agent_name, parent, task);
        Self::new(ctx, state, subscriber)
    }

    fn new(
        ctx: Arc<ControllerContext>,
        state: AgentState,
        subscriber: String,
    ) -> Result<Self, EngineError> {
        let agent = ctx
            .agents
            .get(&state.agent_name)
            .ok_or_else(|| EngineError::UnknownAgent(state.agent_name.clone()))?;
        let detector = StuckDetector::new(ctx.control.stuck_window);
        Ok(Self {
            ctx,
            state,
            agent,
            detector,
            subscriber,
            echo: 0,
            announce_sent: None,
            step: None,
            child: None,
            dispatch_clock: None,
            last_activity: Instant::now(),
            warned_iterations: false,
            warned_budget: false,
            done: false,
        })
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Runs the controller on its own task
    pub fn spawn(self) -> JoinHandle<ControllerExit> {
        tokio::spawn(self.run())
    }

    /// Replays the agent's history, then processes live events until the
    /// agent is terminal or the stream closes.
    #[instrument(skip(self), fields(agent = %self.state.agent_name))]
    pub async fn run(mut self) -> ControllerExit {
        self.replay().await;

        let (inbox, mut events) = Inbox::channel();
        if let Err(e) = self
            .ctx
            .stream
            .subscribe(&self.subscriber, Arc::new(inbox), Some(self.state.last_applied))
            .await
        {
            error!(error = %e, "Controller could not subscribe to the event stream");
            return self.exit();
        }

        let mut tick = tokio::time::interval(self.ctx.control.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.last_activity = Instant::now();
        self.reconcile().await;

        while !self.done {
            tokio::select! {
                message = events.recv() => match message {
                    Some(InboxMessage::Event(event)) => self.on_event(event).await,
                    Some(InboxMessage::Closed) | None => {
                        debug!("Event stream closed; controller draining");
                        break;
                    }
                },
                outcome = join_step(&mut self.step) => self.on_step(outcome).await,
                exit = join_child(&mut self.child) => self.on_child_exit(exit).await,
                _ = tick.tick() => self.on_tick().await,
            }
        }

        self.shutdown().await
    }

    /// Folds the persisted view, then leaves `Loading`
    async fn replay(&mut self) {
        let events = self
            .ctx
            .stream
            .get_events(&EventFilter::all(), self.state.history_cursor, None)
            .await;
        for event in &events {
            self.state.apply(event);
        }
        self.state.finish_loading();
        self.track_dispatch();

        info!(
            events = events.len(),
            status = %self.state.status,
            iterations = self.state.iteration_flag,
            "Replayed agent history"
        );

        if self.ctx.auto_resume && self.state.status == AgentStatus::Paused {
            self.request_resume().await;
        }
    }

    async fn on_event(&mut self, event: Arc<Event>) {
        self.last_activity = Instant::now();
        let metered = event.llm_metrics.is_some();

        if let Some(transition) = self.state.apply(&event) {
            self.on_transition(transition).await;
        }
        self.track_dispatch();
        if metered {
            self.monitor();
        }
        self.reconcile().await;
    }

    async fn shutdown(mut self) -> ControllerExit {
        if let Some(step) = self.step.take() {
            step.abort();
        }
        self.ctx.stream.unsubscribe(&self.subscriber).await;
        if let Some(child) = self.child.take() {
            if let Err(e) = child.await {
                debug!(error = %e, "Child controller did not exit cleanly");
            }
        }
        info!(status = %self.state.status, "Controller stopped");
        self.exit()
    }

    fn exit(&self) -> ControllerExit {
        ControllerExit {
            agent: self.state.agent_name.clone(),
            status: self.state.status,
        }
    }

    fn delegate_id(&self) -> Option<EventId> {
        self.state.parent.as_ref().map(|parent| parent.delegate_id)
    }

    /// Whether everything this controller appended has been folded
    fn settled(&self) -> bool {
        self.state.last_applied >= self.echo
    }

    /// Starts a fresh timeout window whenever a new action becomes pending
    fn track_dispatch(&mut self) {
        self.dispatch_clock = match (&self.state.pending_action, self.dispatch_clock) {
            (Some(pending), Some((id, since))) if pending.id == id => Some((id, since)),
            (Some(pending), _) => Some((pending.id, Instant::now())),
            (None, _) => None,
        };
    }
}

/// Resolves with the step result, or never when no step is in flight
async fn join_step(step: &mut Option<JoinHandle<StepOutcome>>) -> Result<StepOutcome, JoinError> {
    match step {
        Some(handle) => {
            let result = handle.await;
            *step = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn join_child(
    child: &mut Option<JoinHandle<ControllerExit>>,
) -> Result<ControllerExit, JoinError> {
    match child {
        Some(handle) => {
            let result = handle.await;
            *child = None;
            result
        }
        None => std::future::pending().await,
    }
}
