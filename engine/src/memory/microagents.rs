//! Keyword-triggered knowledge files
//!
//! A microagent is a Markdown file with a small frontmatter header:
//!
//! ```text
//! ---
//! name: rust-testing
//! triggers: cargo test, proptest
//! ---
//! Run `cargo test -p <crate>` to keep the feedback loop short.
//! ```
//!
//! Its body is recalled when any trigger appears as a whole word in the
//! user's message, case-insensitively.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Microagent {
    pub name: String,
    pub triggers: Vec<String>,
    pub content: String,
    pub path: PathBuf,
    patterns: Vec<Regex>,
}

impl Microagent {
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let body = text
            .strip_prefix("---\n")
            .or_else(|| text.strip_prefix("---\r\n"))
            .ok_or_else(|| anyhow::anyhow!("missing frontmatter"))?;
        let (header, content) = body
            .split_once("\n---")
            .ok_or_else(|| anyhow::anyhow!("malformed frontmatter (missing closing ---)"))?;

        let mut name = None;
        let mut triggers = Vec::new();
        for line in header.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("name:") {
                name = Some(unquote(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("triggers:") {
                triggers = rest
                    .trim()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(unquote)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }

        let name = match name {
            Some(name) => name,
            None => path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("microagent")
                .to_string(),
        };

        let patterns = triggers
            .iter()
            .map(|trigger| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(trigger))))
            .collect::<Result<Vec<_>, _>>()
            .context("invalid trigger")?;

        Ok(Self {
            name,
            triggers,
            content: content.trim_start_matches('-').trim().to_string(),
            path: path.to_path_buf(),
            patterns,
        })
    }

    pub fn is_triggered_by(&self, text: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(text))
    }
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"').trim_matches('\'')
}

/// Loads every `*.md` microagent in `dir`. A missing directory yields none;
/// unparsable files are skipped with a warning.
pub fn load_microagents(dir: &Path) -> Vec<Microagent> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            debug!(dir = %dir.display(), "No microagents directory");
            return Vec::new();
        }
    };

    let mut agents: Vec<Microagent> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("md"))
        .filter_map(|path| {
            let parsed = std::fs::read_to_string(&path)
                .context("read failed")
                .and_then(|text| Microagent::parse(&path, &text));
            match parsed {
                Ok(agent) => {
                    info!(name = %agent.name, triggers = ?agent.triggers, "Loaded microagent");
                    Some(agent)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping microagent");
                    None
                }
            }
        })
        .collect();
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    agents
}
