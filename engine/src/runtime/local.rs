//! Local runtime
//!
//! Executes actions on the host in the session workspace:
//!
//! - `run`: `sh -c <command>`, stdout and stderr combined, killed on cancel
//! - `read` / `edit`: plain file access relative to the workspace
//! - `think`: acknowledged without side effects
//! - `browse`: HTTP GET
//!
//! Output is truncated to [`MAX_OUTPUT_BYTES`]. Every failure is returned as
//! an `Error { kind: tool }` observation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sdk::event::{Action, ErrorKind, EventId, Observation};
use sdk::runtime::Runtime;
use tokio::fs;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Largest output handed back to the agent
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

const BROWSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct LocalRuntime {
    workspace: PathBuf,
    http: reqwest::Client,
    running: Mutex<HashMap<EventId, oneshot::Sender<()>>>,
}

impl LocalRuntime {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            http: reqwest::Client::builder()
                .timeout(BROWSE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let target = Path::new(path);
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.workspace.join(target)
        }
    }

    fn register(&self, action_id: EventId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut running) = self.running.lock() {
            running.insert(action_id, tx);
        }
        rx
    }

    fn unregister(&self, action_id: EventId) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&action_id);
        }
    }

    async fn run_command(&self, command: &str) -> Result<Observation, String> {
        info!(command, "Running command");
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start command: {}", e))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("failed to wait for command: {}", e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exit_code, bytes = text.len(), "Command finished");
        Ok(Observation::CmdOutput {
            output: truncate_output(text),
            exit_code,
        })
    }

    async fn read_file(&self, path: &str) -> Result<Observation, String> {
        let resolved = self.resolve(path);
        let content = fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("failed to read {}: {}", resolved.display(), e))?;
        Ok(Observation::FileRead {
            path: path.to_string(),
            content: truncate_output(content),
        })
    }

    async fn edit_file(
        &self,
        path: &str,
        old_str: Option<&str>,
        new_str: &str,
    ) -> Result<Observation, String> {
        let resolved = self.resolve(path);

        let summary = match old_str {
            None => {
                if let Some(parent) = resolved.parent() {
                    fs::create_dir_all(parent).await.map_err(|e| {
                        format!("failed to create directories {}: {}", parent.display(), e)
                    })?;
                }
                fs::write(&resolved, new_str)
                    .await
                    .map_err(|e| format!("failed to write {}: {}", resolved.display(), e))?;
                format!("Wrote {} bytes to {}", new_str.len(), path)
            }
            Some(old_str) => {
                let current = fs::read_to_string(&resolved)
                    .await
                    .map_err(|e| format!("failed to read {}: {}", resolved.display(), e))?;
                match current.matches(old_str).count() {
                    0 => return Err(format!("old_str not found in {}", path)),
                    1 => {}
                    n => {
                        return Err(format!(
                            "old_str occurs {} times in {}; include more context to make it unique",
                            n, path
                        ))
                    }
                }
                let updated = current.replacen(old_str, new_str, 1);
                fs::write(&resolved, &updated)
                    .await
                    .map_err(|e| format!("failed to write {}: {}", resolved.display(), e))?;
                format!("Replaced 1 occurrence in {}", path)
            }
        };

        info!(path, "File edited");
        Ok(Observation::FileEdit {
            path: path.to_string(),
            summary,
        })
    }

    async fn browse(&self, url: &str) -> Result<Observation, String> {
        info!(url, "Fetching URL");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read body of {}: {}", url, e))?;
        Ok(Observation::Browse {
            url: url.to_string(),
            status,
            content: truncate_output(body),
        })
    }

    async fn dispatch(&self, action: &Action) -> Result<Observation, String> {
        match action {
            Action::CmdRun { command } => self.run_command(command).await,
            Action::FileRead { path } => self.read_file(path).await,
            Action::FileEdit {
                path,
                old_str,
                new_str,
            } => self.edit_file(path, old_str.as_deref(), new_str).await,
            Action::Think { .. } => Ok(Observation::Think {
                content: "Your thought has been logged.".to_string(),
            }),
            Action::Browse { url } => self.browse(url).await,
            other => Err(format!("'{}' is not a runnable action", other.subkind())),
        }
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    async fn execute(&self, action_id: EventId, action: &Action) -> Observation {
        let cancelled = self.register(action_id);

        let result = tokio::select! {
            result = self.dispatch(action) => Some(result),
            // Dropping the dispatch future kills a running child process
            _ = cancelled => None,
        };
        self.unregister(action_id);

        match result {
            Some(Ok(observation)) => observation,
            Some(Err(message)) => {
                warn!(action_id, %message, "Action failed");
                Observation::Error {
                    kind: ErrorKind::Tool,
                    message,
                }
            }
            None => {
                info!(action_id, "Action cancelled");
                Observation::Error {
                    kind: ErrorKind::Cancelled,
                    message: format!("action {} was cancelled", action_id),
                }
            }
        }
    }

    async fn cancel(&self, action_id: EventId) -> bool {
        let sender = match self.running.lock() {
            Ok(mut running) => running.remove(&action_id),
            Err(_) => None,
        };
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }
}

/// Cuts `text` to at most [`MAX_OUTPUT_BYTES`] on a character boundary
pub fn truncate_output(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let omitted = text.len() - end;
    text.truncate(end);
    text.push_str(&format!("\n[output truncated: {} bytes omitted]", omitted));
    text
}
