//! `session.json`

use std::path::Path;

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::write_atomic;

pub const META_FILE: &str = "session.json";

/// Identity of a session, written once when it starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub root_agent: String,
    pub created_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new(root_agent: impl Into<String>) -> Self {
        let created_at = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            // Sortable by creation time, unique through the random suffix
            id: format!("{}-{}", created_at.format("%Y%m%d-%H%M%S"), &suffix[..8]),
            root_agent: root_agent.into(),
            created_at,
        }
    }

    /// Reads `session.json` from a session directory
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        let path = dir.join(META_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = dir
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| dir.display().to_string());
                return Err(EngineError::SessionNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, dir: &Path) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(META_FILE), &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let meta = SessionMeta::new("orchestrator");
        meta.save(dir.path()).await.unwrap();

        assert_eq!(SessionMeta::load(dir.path()).unwrap(), meta);
        assert_eq!(meta.id.len(), "20261016-100000-".len() + 8);
    }

    #[test]
    fn test_missing_session() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SessionMeta::load(&missing),
            Err(EngineError::SessionNotFound(id)) if id == "nope"
        ));
    }
}
