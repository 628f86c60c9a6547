//! On-disk layout of a session's event log
//!
//! ```text
//! <session>/events/00000000000000000001.json
//! <session>/cursors/<subscriber>.txt
//! ```
//!
//! Every file is written to a temporary sibling, fsynced, then renamed into
//! place, so a crash mid-write leaves either the complete file or nothing.

use std::path::{Path, PathBuf};

use sdk::errors::EngineError;
use sdk::event::{Event, EventId};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const EVENTS_DIR: &str = "events";
const CURSORS_DIR: &str = "cursors";
const TEMP_SUFFIX: &str = ".tmp";

/// File-per-event persistence for one session directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) the store rooted at `root`
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        for dir in [EVENTS_DIR, CURSORS_DIR] {
            std::fs::create_dir_all(root.join(dir)).map_err(|e| {
                EngineError::Persistence(format!("Failed to create {:?}: {}", root.join(dir), e))
            })?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `events/<20-digit id>.json`
    pub fn event_path(&self, id: EventId) -> PathBuf {
        self.root
            .join(EVENTS_DIR)
            .join(format!("{:020}.json", id))
    }

    pub fn cursor_path(&self, subscriber: &str) -> PathBuf {
        self.root
            .join(CURSORS_DIR)
            .join(format!("{}.txt", cursor_file_stem(subscriber)))
    }

    /// Persists one event atomically
    pub async fn write_event(&self, event: &Event) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(event)?;
        write_atomic(&self.event_path(event.id), &bytes).await
    }

    /// Loads every persisted event in id order.
    ///
    /// Leftover temporary files from an interrupted write are removed. The
    /// ids must form the dense sequence `1..=n`.
    pub fn load_events(&self) -> Result<Vec<Event>, EngineError> {
        let dir = self.root.join(EVENTS_DIR);
        let mut files = Vec::new();

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| EngineError::Persistence(format!("Failed to read {:?}: {}", dir, e)))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(TEMP_SUFFIX) {
                warn!(file = %name, "Removing partially written event file");
                std::fs::remove_file(&path)?;
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match stem.parse::<EventId>() {
                Ok(id) => files.push((id, path)),
                Err(_) => warn!(file = %name, "Ignoring unexpected file in events directory"),
            }
        }
        files.sort_by_key(|(id, _)| *id);

        let mut events = Vec::with_capacity(files.len());
        for (expected, (id, path)) in (1u64..).zip(files) {
            if id != expected {
                return Err(EngineError::InvalidEvent(format!(
                    "event log has a gap: expected id {}, found {}",
                    expected, id
                )));
            }
            let bytes = std::fs::read(&path)?;
            let event: Event = serde_json::from_slice(&bytes).map_err(|e| {
                EngineError::InvalidEvent(format!("event {} is unreadable: {}", id, e))
            })?;
            if event.id != id {
                return Err(EngineError::InvalidEvent(format!(
                    "file for event {} contains event {}",
                    id, event.id
                )));
            }
            events.push(event);
        }

        debug!(count = events.len(), root = ?self.root, "Loaded event log");
        Ok(events)
    }

    /// Last delivered id for `subscriber`, if it ever received an event
    pub fn read_cursor(&self, subscriber: &str) -> Result<Option<EventId>, EngineError> {
        let path = self.cursor_path(subscriber);
        match std::fs::read_to_string(&path) {
            Ok(text) => text.trim().parse::<EventId>().map(Some).map_err(|e| {
                EngineError::Persistence(format!("Corrupt cursor {:?}: {}", path, e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_cursor(&self, subscriber: &str, id: EventId) -> Result<(), EngineError> {
        write_atomic(&self.cursor_path(subscriber), id.to_string().as_bytes()).await
    }
}

/// Subscriber names may contain `:` or `/`; cursor files may not. Every
/// other byte, `_` included, becomes `_XX`, so distinct names never share a
/// file.
fn cursor_file_stem(subscriber: &str) -> String {
    let mut stem = String::with_capacity(subscriber.len());
    for byte in subscriber.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{:02X}", byte));
        }
    }
    stem
}

/// Temp file, write, fsync, rename, fsync the directory.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| EngineError::Persistence(format!("Invalid file name {:?}", path)))?;
    let temp_path = path.with_file_name(format!(".{}{}", file_name, TEMP_SUFFIX));

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to create {:?}: {}", temp_path, e)))?;
    file.write_all(bytes)
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to write {:?}: {}", temp_path, e)))?;
    file.sync_all()
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to sync {:?}: {}", temp_path, e)))?;
    drop(file);

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to rename {:?}: {}", path, e)))?;

    sync_parent(path).await
}

/// Makes a completed rename durable
#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let dir = tokio::fs::File::open(parent)
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to open {:?}: {}", parent, e)))?;
    dir.sync_all()
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to sync {:?}: {}", parent, e)))
}

// Directories cannot be opened for syncing here
#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<(), EngineError> {
    Ok(())
}
