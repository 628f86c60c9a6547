//! Session wiring
//!
//! A session is one directory under `core.session_root` holding the event
//! log, subscriber cursors and `session.json`. [`Session`] opens the stream,
//! registers the runtime, the confirmation responder and memory as
//! subscribers, then spawns the root agent's controller.
//!
//! Resuming uses the same path: the stream reloads the persisted events, the
//! runtime picks up from its saved cursor, the confirmation responder
//! re-reads the whole log so unanswered requests are asked again, and the
//! controllers replay their views before going live.

mod meta;
mod store;

pub use meta::{SessionMeta, META_FILE};
pub use store::{SessionStore, SessionSummary};

use std::path::Path;
use std::sync::Arc;

use sdk::errors::EngineError;
use sdk::event::{Action, AgentStatus, EventId, EventSource, NewEvent, StateChange};
use sdk::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::agent::AgentRegistry;
use crate::config::Config;
use crate::confirmation::{ConfirmationResponder, Confirmer};
use crate::controller::{ActiveAgent, AgentController, ControllerContext, ControllerExit};
use crate::memory::{load_microagents, Memory};
use crate::runtime::RuntimeSubscriber;
use crate::stream::EventStream;

/// Collaborators a session is built from
pub struct SessionServices {
    pub agents: AgentRegistry,
    pub runtime: Arc<dyn Runtime>,
    pub confirmer: Arc<dyn Confirmer>,
}

/// A running session
pub struct Session {
    meta: SessionMeta,
    stream: EventStream,
    /// Last persisted event when this process opened the session
    opened_at: EventId,
    ctx: Arc<ControllerContext>,
    root: JoinHandle<ControllerExit>,
}

impl Session {
    /// Creates a new session directory and starts the root agent
    pub async fn start(config: &Config, services: SessionServices) -> Result<Self, EngineError> {
        let meta = SessionMeta::new(config.core.root_agent.clone());
        let dir = SessionStore::new(&config.core.session_root).session_dir(&meta.id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            EngineError::Persistence(format!("Failed to create {:?}: {}", dir, e))
        })?;
        meta.save(&dir).await?;

        info!(session = %meta.id, root_agent = %meta.root_agent, "Session started");
        Self::open(config, meta, &dir, services, false).await
    }

    /// Reopens a persisted session and continues where its log left off
    pub async fn resume(
        config: &Config,
        id: &str,
        services: SessionServices,
    ) -> Result<Self, EngineError> {
        let dir = SessionStore::new(&config.core.session_root).session_dir(id);
        let meta = SessionMeta::load(&dir)?;

        info!(session = %meta.id, root_agent = %meta.root_agent, "Session resumed");
        Self::open(config, meta, &dir, services, true).await
    }

    #[instrument(skip_all, fields(session = %meta.id))]
    async fn open(
        config: &Config,
        meta: SessionMeta,
        dir: &Path,
        services: SessionServices,
        resumed: bool,
    ) -> Result<Self, EngineError> {
        // The recorded root wins over whatever the config names today
        let mut config = config.clone();
        config.core.root_agent = meta.root_agent.clone();

        let stream = EventStream::open(dir, &meta.id)?;
        let opened_at = stream.latest_id();

        let runtime = RuntimeSubscriber::new(stream.clone(), Arc::clone(&services.runtime));
        stream
            .subscribe(&runtime.name(), Arc::new(runtime), None)
            .await?;

        let responder = ConfirmationResponder::new(stream.clone(), services.confirmer);
        stream
            .subscribe(ConfirmationResponder::NAME, Arc::new(responder), Some(0))
            .await?;

        if config.core.memory_enabled {
            let microagents = load_microagents(&config.core.microagents_dir);
            let memory = Memory::new(stream.clone(), config.core.workspace.clone(), microagents);
            stream.subscribe(Memory::NAME, Arc::new(memory), None).await?;
        }

        let ctx = Arc::new(
            ControllerContext::new(stream.clone(), services.agents, services.runtime, &config)
                .with_auto_resume(resumed),
        );
        let root = AgentController::root(Arc::clone(&ctx), &meta.root_agent)?.spawn();

        Ok(Self {
            meta,
            stream,
            opened_at,
            ctx,
            root,
        })
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn dir(&self) -> &Path {
        self.stream.dir()
    }

    pub fn stream(&self) -> &EventStream {
        &self.stream
    }

    /// Id of the last event written before this process opened the session
    pub fn opened_at(&self) -> EventId {
        self.opened_at
    }

    /// Agent on top of the delegation stack
    pub fn active(&self) -> ActiveAgent {
        self.ctx.active()
    }

    pub fn watch_active(&self) -> watch::Receiver<ActiveAgent> {
        self.ctx.watch_active()
    }

    /// Appends a user message addressed to the active agent
    pub async fn send_message(&self, content: impl Into<String>) -> Result<EventId, EngineError> {
        let agent = self.active().agent;
        self.stream
            .append(NewEvent::user_message(agent, content))
            .await
    }

    /// Asks the active agent to pause
    pub async fn pause(&self) -> Result<EventId, EngineError> {
        self.change_state(StateChange::Pause).await
    }

    /// Asks a paused agent to carry on
    pub async fn resume_agent(&self) -> Result<EventId, EngineError> {
        self.change_state(StateChange::Resume).await
    }

    async fn change_state(&self, change: StateChange) -> Result<EventId, EngineError> {
        let agent = self.active().agent;
        self.stream
            .append(NewEvent::action(
                EventSource::User,
                agent,
                Action::ChangeAgentState { change },
            ))
            .await
    }

    /// Waits until the active agent matches `predicate`.
    ///
    /// Returns `None` once the controllers are gone and the value can no
    /// longer change.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<ActiveAgent>
    where
        F: FnMut(&ActiveAgent) -> bool,
    {
        let mut active = self.watch_active();
        let found = active.wait_for(|agent| predicate(agent)).await;
        found.ok().map(|agent| agent.clone())
    }

    /// Closes the stream and waits for the root controller to stop
    pub async fn close(self) -> ControllerExit {
        self.stream.close().await;
        self.finish().await
    }

    /// Waits for the root controller to stop on its own, then closes the
    /// stream
    pub async fn join(self) -> ControllerExit {
        let stream = self.stream.clone();
        let exit = self.finish().await;
        stream.close().await;
        exit
    }

    async fn finish(self) -> ControllerExit {
        match self.root.await {
            Ok(exit) => {
                info!(session = %self.meta.id, status = %exit.status, "Session closed");
                exit
            }
            Err(e) => {
                error!(session = %self.meta.id, error = %e, "Root controller panicked");
                ControllerExit {
                    agent: self.meta.root_agent,
                    status: AgentStatus::Errored,
                }
            }
        }
    }
}
