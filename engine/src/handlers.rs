//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - start: Run a new session interactively
//! - resume: Continue a persisted session
//! - sessions: List sessions
//! - clean: Remove old sessions (dry run unless forced)
//!
//! `start` and `resume` return the process exit code derived from the root
//! agent's final state.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::{EngineError, EXIT_RUNTIME_ERROR, EXIT_SUCCESS, EXIT_USER_CANCEL};
use sdk::event::{Action, AgentStatus, Event, EventId, EventSource, Observation};
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::agent::AgentRegistry;
use crate::config::Config;
use crate::confirmation::TerminalConfirmer;
use crate::llm::openai::OpenAIProvider;
use crate::runtime::LocalRuntime;
use crate::session::{Session, SessionServices, SessionStore, SessionSummary};
use crate::stream::Subscriber;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// How long to wait for a requested pause to land before closing anyway
const PAUSE_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Maps the root agent's final state to the process exit code
pub fn exit_code_for(status: AgentStatus) -> i32 {
    match status {
        AgentStatus::Finished => EXIT_SUCCESS,
        AgentStatus::Errored | AgentStatus::Stuck => EXIT_RUNTIME_ERROR,
        _ => EXIT_USER_CANCEL,
    }
}

/// Start a new session
///
/// With a task the root agent starts working at once; without one the
/// first line typed on stdin becomes the task.
pub async fn handle_start(task: Option<String>, config: &Config, format: OutputFormat) -> Result<i32> {
    let terminal = Terminal::new();
    let services = build_services(config, &terminal)?;
    let session = Session::start(config, services)
        .await
        .context("Failed to start session")?;

    announce_session(&session, format, "started")?;
    let prompts = attach_console(&session, format).await?;

    let awaiting = match task {
        Some(task) => {
            let id = session.send_message(task).await?;
            Awaiting::After(id)
        }
        None => Awaiting::Now,
    };
    converse(session, terminal, prompts, awaiting, format).await
}

/// Resume a persisted session
pub async fn handle_resume(id: String, config: &Config, format: OutputFormat) -> Result<i32> {
    let terminal = Terminal::new();
    let services = build_services(config, &terminal)?;
    let session = Session::resume(config, &id, services)
        .await
        .with_context(|| format!("Failed to resume session {}", id))?;

    announce_session(&session, format, "resumed")?;
    let prompts = attach_console(&session, format).await?;

    // Replay publishes the active agent once its history is folded
    let active = session
        .wait_for(|active| active.status != AgentStatus::Loading)
        .await;
    let awaiting = match active {
        Some(active) if active.is_session_over() => {
            let exit = session.close().await;
            report_exit(format, &exit.agent, exit.status)?;
            return Ok(exit_code_for(exit.status));
        }
        Some(active)
            if matches!(
                active.status,
                AgentStatus::Init | AgentStatus::AwaitingUserInput
            ) =>
        {
            Awaiting::Now
        }
        _ => Awaiting::After(session.opened_at()),
    };
    converse(session, terminal, prompts, awaiting, format).await
}

/// List sessions, newest first
pub async fn handle_sessions(config: &Config, format: OutputFormat) -> Result<()> {
    let store = SessionStore::new(&config.core.session_root);
    let sessions = store.list().context("Failed to list sessions")?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions in {}", store.root().display());
                return Ok(());
            }
            println!(
                "{:<26} {:<16} {:<20} {:<20} {:>7}",
                "ID", "ROOT AGENT", "CREATED", "LAST STATE", "EVENTS"
            );
            for session in &sessions {
                print_summary(session);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "sessions": sessions,
                "count": sessions.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Remove sessions older than `days` days; only lists them unless `force`
pub async fn handle_clean(
    days: u32,
    force: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let store = SessionStore::new(&config.core.session_root);
    let stale = store
        .clean(days, force, Utc::now())
        .context("Failed to clean sessions")?;

    match format {
        OutputFormat::Text => {
            if stale.is_empty() {
                println!("No sessions older than {} days.", days);
                return Ok(());
            }
            for session in &stale {
                print_summary(session);
            }
            if force {
                println!("\nRemoved {} session(s).", stale.len());
            } else {
                println!(
                    "\n{} session(s) would be removed. Re-run with --force to delete them.",
                    stale.len()
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "sessions": stale,
                "count": stale.len(),
                "removed": force,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_summary(session: &SessionSummary) {
    println!(
        "{:<26} {:<16} {:<20} {:<20} {:>7}",
        session.id,
        session.root_agent,
        session.created_at.format("%Y-%m-%d %H:%M:%S"),
        session
            .last_state
            .map(|state| state.to_string())
            .unwrap_or_else(|| "-".to_string()),
        session.event_count
    );
}

/// Stdin lines and the Ctrl-C flag, shared by the conversation loop and the
/// confirmation prompt
struct Terminal {
    input: Arc<Mutex<mpsc::Receiver<String>>>,
    interrupt: watch::Sender<bool>,
}

impl Terminal {
    fn new() -> Self {
        let (lines, input) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            loop {
                match stdin.next_line().await {
                    Ok(Some(line)) => {
                        if lines.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        });

        let (interrupt, _) = watch::channel(false);
        Self {
            input: Arc::new(Mutex::new(input)),
            interrupt,
        }
    }

    async fn read_line(&self) -> Option<String> {
        self.input.lock().await.recv().await
    }
}

/// Builds the agents, runtime and confirmation prompt from configuration
fn build_services(config: &Config, terminal: &Terminal) -> Result<SessionServices> {
    let provider = OpenAIProvider::new(config.llm.clone())
        .map_err(|e| EngineError::Config(format!("LLM provider: {}", e)))?;
    let agents = AgentRegistry::from_config(config, Arc::new(provider))?;
    let runtime = LocalRuntime::new(config.core.workspace.clone());
    let confirmer = TerminalConfirmer::new(
        Arc::clone(&terminal.input),
        terminal.interrupt.subscribe(),
        config.control.confirmation_timeout(),
        config.control.confirmation_default,
    );

    Ok(SessionServices {
        agents,
        runtime: Arc::new(runtime),
        confirmer: Arc::new(confirmer),
    })
}

fn announce_session(session: &Session, format: OutputFormat, verb: &str) -> Result<()> {
    info!(session = %session.id(), "Session {}", verb);
    match format {
        OutputFormat::Text => println!(
            "Session {} {} ({})",
            session.id(),
            verb,
            session.dir().display()
        ),
        OutputFormat::Json => {
            let output = json!({
                "session": session.id(),
                "status": verb,
                "dir": session.dir(),
            });
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}

fn report_exit(format: OutputFormat, agent: &str, status: AgentStatus) -> Result<()> {
    match format {
        OutputFormat::Text => println!("\n{} ended: {}", agent, status),
        OutputFormat::Json => {
            let output = json!({
                "agent": agent,
                "status": status,
                "exit_code": exit_code_for(status),
            });
            println!("{}", serde_json::to_string(&output)?);
        }
    }
    Ok(())
}

/// Signals from the console to the conversation loop
#[derive(Debug, Clone, PartialEq, Eq)]
enum Prompt {
    /// An agent announced it waits for the user
    Input { at: EventId },
    /// The root agent reached a terminal state
    Over,
}

/// When the loop should next read a line
enum Awaiting {
    Now,
    /// After an input announcement newer than this event
    After(EventId),
}

/// Prints live events and tells the loop when input is needed
struct Console {
    format: OutputFormat,
    root: String,
    prompts: mpsc::Sender<Prompt>,
}

const CONSOLE: &str = "console";

async fn attach_console(session: &Session, format: OutputFormat) -> Result<mpsc::Receiver<Prompt>> {
    let (prompts, rx) = mpsc::channel(32);
    let console = Console {
        format,
        root: session.meta().root_agent.clone(),
        prompts,
    };
    // Everything written since this process opened the session
    session
        .stream()
        .subscribe(CONSOLE, Arc::new(console), Some(session.opened_at()))
        .await?;
    Ok(rx)
}

#[async_trait]
impl Subscriber for Console {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Text => print_event(&event),
            OutputFormat::Json => println!("{}", serde_json::to_string(event.as_ref())?),
        }

        if let Some(Observation::AgentStateChanged { state }) = event.as_observation() {
            let prompt = if *state == AgentStatus::AwaitingUserInput {
                Some(Prompt::Input { at: event.id })
            } else if state.is_terminal() && event.agent == self.root {
                Some(Prompt::Over)
            } else {
                None
            };
            if let Some(prompt) = prompt {
                // A closed loop no longer listens
                let _ = self.prompts.send(prompt).await;
            }
        }
        Ok(())
    }
}

fn print_event(event: &Event) {
    let agent = &event.agent;
    if let Some(action) = event.as_action() {
        if event.source == EventSource::User {
            return;
        }
        match action {
            Action::Message { content } => println!("\n[{}] {}", agent, content),
            Action::Finish { message, .. } => println!("\n[{}] {}", agent, message),
            Action::ChangeAgentState { .. } | Action::ConfirmationRequest { .. } => {}
            Action::AgentSwitch { .. } => debug!(event_id = event.id, "Agent switch"),
            other => println!("[{}] {}", agent, other.summary()),
        }
        return;
    }

    match event.as_observation() {
        Some(Observation::CmdOutput { output, exit_code }) => {
            print!("{}", output);
            if *exit_code != 0 {
                println!("[exit code: {}]", exit_code);
            }
        }
        Some(
            observation @ (Observation::Error { .. }
            | Observation::Reject { .. }
            | Observation::Delegate { .. }
            | Observation::Confirmation { .. }),
        ) => println!("[{}] {}", agent, observation.content()),
        Some(Observation::AgentStateChanged { state }) if *state != AgentStatus::Running => {
            println!("-- {} is {}", agent, state)
        }
        _ => {}
    }
}

/// How the conversation loop ended
#[derive(Debug)]
enum Ending {
    Over,
    Paused,
    Exited,
}

/// Reads user turns until the root agent is done, the user leaves, or
/// Ctrl-C pauses the session.
async fn converse(
    session: Session,
    terminal: Terminal,
    mut prompts: mpsc::Receiver<Prompt>,
    awaiting: Awaiting,
    format: OutputFormat,
) -> Result<i32> {
    let (mut read_now, mut last_sent) = match awaiting {
        Awaiting::Now => (true, 0),
        Awaiting::After(id) => (false, id),
    };

    let ending = loop {
        if read_now {
            read_now = false;
            if format == OutputFormat::Text {
                print!("\n> ");
                let _ = std::io::stdout().flush();
            }
            tokio::select! {
                line = terminal.read_line() => match line.as_deref().map(str::trim) {
                    None | Some("/exit") => break Ending::Exited,
                    Some("/pause") => break Ending::Paused,
                    Some("") => read_now = true,
                    Some(text) => last_sent = session.send_message(text).await?,
                },
                _ = tokio::signal::ctrl_c() => break Ending::Paused,
            }
            continue;
        }

        tokio::select! {
            prompt = prompts.recv() => match prompt {
                // Announcements older than the last message are stale
                Some(Prompt::Input { at }) => read_now = at > last_sent,
                Some(Prompt::Over) | None => break Ending::Over,
            },
            _ = tokio::signal::ctrl_c() => break Ending::Paused,
        }
    };

    if let Ending::Paused = ending {
        terminal.interrupt.send_replace(true);
        match session.pause().await {
            Ok(_) => {
                let paused = tokio::time::timeout(
                    PAUSE_GRACE,
                    session.wait_for(|active| {
                        active.status == AgentStatus::Paused || active.is_session_over()
                    }),
                )
                .await;
                if paused.is_err() {
                    warn!("Pause was not acknowledged in time");
                }
            }
            Err(e) => warn!(error = %e, "Failed to pause session"),
        }
        if format == OutputFormat::Text {
            println!("\nSession {} paused. Resume with `crew resume {}`.", session.id(), session.id());
        }
    }
    debug!(?ending, "Conversation loop ended");

    let exit = match ending {
        Ending::Over => session.join().await,
        Ending::Paused | Ending::Exited => session.close().await,
    };
    report_exit(format, &exit.agent, exit.status)?;
    Ok(exit_code_for(exit.status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(AgentStatus::Finished), 0);
        assert_eq!(exit_code_for(AgentStatus::Paused), 1);
        assert_eq!(exit_code_for(AgentStatus::Rejected), 1);
        assert_eq!(exit_code_for(AgentStatus::AwaitingUserInput), 1);
        assert_eq!(exit_code_for(AgentStatus::Errored), 3);
        assert_eq!(exit_code_for(AgentStatus::Stuck), 3);
    }

    #[tokio::test]
    async fn test_console_signals_input_and_end() {
        let (prompts, mut rx) = mpsc::channel(4);
        let console = Console {
            format: OutputFormat::Json,
            root: "orchestrator".to_string(),
            prompts,
        };
        let state = |id, agent: &str, state| {
            Arc::new(
                Event::seal(
                    sdk::event::NewEvent::notice(
                        EventSource::Environment,
                        agent,
                        Observation::AgentStateChanged { state },
                    ),
                    id,
                    Utc::now(),
                )
                .unwrap(),
            )
        };

        console
            .on_event(state(4, "coder", AgentStatus::AwaitingUserInput))
            .await
            .unwrap();
        console
            .on_event(state(5, "coder", AgentStatus::Finished))
            .await
            .unwrap();
        console
            .on_event(state(8, "orchestrator", AgentStatus::Finished))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Prompt::Input { at: 4 }));
        assert_eq!(rx.recv().await, Some(Prompt::Over));
    }
}
