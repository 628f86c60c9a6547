//! Listing and cleaning session directories

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use sdk::errors::EngineError;
use sdk::event::{AgentStatus, Observation};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::meta::{SessionMeta, META_FILE};
use crate::stream::FileStore;

/// One line of `crew sessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub root_agent: String,
    pub created_at: DateTime<Utc>,
    /// Last state recorded for the root agent
    pub last_state: Option<AgentStatus>,
    pub event_count: usize,
    #[serde(skip)]
    pub dir: PathBuf,
}

/// Session directories under `core.session_root`
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Every readable session, newest first. Directories without a
    /// `session.json` are skipped.
    pub fn list(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let dir = entry?.path();
            if !dir.join(META_FILE).is_file() {
                debug!(dir = %dir.display(), "Skipping directory without session metadata");
                continue;
            }
            match summarize(&dir) {
                Ok(summary) => sessions.push(summary),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping unreadable session"),
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Sessions created more than `days` days before `now`
    pub fn older_than(
        &self,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionSummary>, EngineError> {
        let cutoff = now - Duration::days(i64::from(days));
        Ok(self
            .list()?
            .into_iter()
            .filter(|session| session.created_at < cutoff)
            .collect())
    }

    /// Finds sessions older than `days` days and deletes them when `force`
    /// is set. Without `force` nothing is touched.
    pub fn clean(
        &self,
        days: u32,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionSummary>, EngineError> {
        let stale = self.older_than(days, now)?;
        if force {
            for session in &stale {
                std::fs::remove_dir_all(&session.dir)?;
                info!(session = %session.id, "Removed session");
            }
        }
        Ok(stale)
    }
}

fn summarize(dir: &Path) -> Result<SessionSummary, EngineError> {
    let meta = SessionMeta::load(dir)?;
    let events = FileStore::open(dir)?.load_events()?;
    let last_state = events.iter().rev().find_map(|event| match event.as_observation() {
        Some(Observation::AgentStateChanged { state }) if event.agent == meta.root_agent => {
            Some(*state)
        }
        _ => None,
    });

    Ok(SessionSummary {
        id: meta.id,
        root_agent: meta.root_agent,
        created_at: meta.created_at,
        last_state,
        event_count: events.len(),
        dir: dir.to_path_buf(),
    })
}
