//! Memory
//!
//! A passive subscriber that gathers context once per session. On the first
//! user message it appends a `Recall` observation with the workspace path,
//! repository facts, runtime facts, and the bodies of any microagents the
//! message triggers.

mod microagents;

pub use microagents::{load_microagents, Microagent};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sdk::event::{Action, Event, EventSource, NewEvent, Observation};
use tracing::{debug, info};

use crate::stream::{EventFilter, EventStream, Subscriber};

/// Top-level entries listed in the recall
const MAX_LISTED_ENTRIES: usize = 40;

pub struct Memory {
    stream: EventStream,
    workspace: PathBuf,
    microagents: Vec<Microagent>,
}

impl Memory {
    pub const NAME: &'static str = "memory";

    pub fn new(stream: EventStream, workspace: PathBuf, microagents: Vec<Microagent>) -> Self {
        Self {
            stream,
            workspace,
            microagents,
        }
    }

    /// Builds the recall for `message`
    pub fn recall(&self, message: &str) -> Observation {
        let knowledge = self
            .microagents
            .iter()
            .filter(|agent| agent.is_triggered_by(message))
            .map(|agent| format!("## {}\n{}", agent.name, agent.content))
            .collect();

        Observation::Recall {
            workspace: self.workspace.display().to_string(),
            repo_info: repo_info(&self.workspace),
            runtime_info: format!(
                "OS: {} ({})\nDate: {}",
                std::env::consts::OS,
                std::env::consts::ARCH,
                Utc::now().format("%Y-%m-%d")
            ),
            knowledge,
        }
    }
}

#[async_trait]
impl Subscriber for Memory {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        let Some(Action::Message { content }) = event.as_action() else {
            return Ok(());
        };
        if event.source != EventSource::User {
            return Ok(());
        }

        let recalled = self
            .stream
            .get_events(&EventFilter::all().subkind("recall"), 1, Some(1))
            .await;
        if !recalled.is_empty() {
            debug!("Context already recalled for this session");
            return Ok(());
        }

        let recall = self.recall(content);
        if let Observation::Recall { knowledge, .. } = &recall {
            info!(event_id = event.id, microagents = knowledge.len(), "Recalling session context");
        }
        self.stream
            .append(NewEvent::observation(
                EventSource::Environment,
                event.agent.clone(),
                event.id,
                recall,
            ))
            .await?;
        Ok(())
    }
}

/// Git presence, current branch and top-level entries
fn repo_info(workspace: &Path) -> String {
    let git_dir = workspace.join(".git");
    let mut info = if git_dir.is_dir() {
        let branch = std::fs::read_to_string(git_dir.join("HEAD"))
            .ok()
            .and_then(|head| {
                head.trim()
                    .strip_prefix("ref: refs/heads/")
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "detached HEAD".to_string());
        format!("Git repository on branch {}", branch)
    } else {
        "Not a git repository".to_string()
    };

    if let Ok(entries) = std::fs::read_dir(workspace) {
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.path().is_dir() {
                    format!("{}/", name)
                } else {
                    name
                }
            })
            .filter(|name| name != ".git/")
            .collect();
        names.sort();
        let total = names.len();
        names.truncate(MAX_LISTED_ENTRIES);
        info.push_str(&format!("\nTop-level entries ({}): {}", total, names.join(", ")));
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_repo_info_reads_branch_and_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/feature/x\n").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();

        let info = repo_info(dir.path());
        assert!(info.contains("branch feature/x"));
        assert!(info.contains("Cargo.toml, src/"));
        assert!(!info.contains(".git/"));
    }

    #[tokio::test]
    async fn test_first_user_message_is_recalled_once() {
        let session = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let stream = EventStream::open(session.path(), "s1").unwrap();
        let microagent = Microagent::parse(
            Path::new("docker.md"),
            "---\ntriggers: docker\n---\nUse compose.",
        )
        .unwrap();
        let memory = Memory::new(
            stream.clone(),
            workspace.path().to_path_buf(),
            vec![microagent],
        );

        let first = stream
            .append(NewEvent::user_message("orchestrator", "ship the docker image"))
            .await
            .unwrap();
        memory.on_event(stream.event(first).await.unwrap()).await.unwrap();
        let second = stream
            .append(NewEvent::user_message("orchestrator", "and docker again"))
            .await
            .unwrap();
        memory.on_event(stream.event(second).await.unwrap()).await.unwrap();

        let recalls = stream
            .get_events(&EventFilter::all().subkind("recall"), 1, None)
            .await;
        assert_eq!(recalls.len(), 1);
        assert_eq!(recalls[0].cause_id, Some(first));
        match recalls[0].as_observation() {
            Some(Observation::Recall { knowledge, .. }) => {
                assert_eq!(knowledge, &vec!["## docker\nUse compose.".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
