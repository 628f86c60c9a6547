//! Risk tiers for runnable actions
//!
//! - **Tier 0 (read-only)**: `read`, `think`, `browse`, and shell commands
//!   that only inspect (`ls`, `cat`, `git status`, ...)
//! - **Tier 1 (write/reversible)**: file edits and ordinary commands
//! - **Tier 2 (destructive)**: deleting, force-pushing, resetting, privilege
//!   escalation, or any command carrying a dangerous flag
//!
//! A command is as risky as its riskiest segment, so `ls && rm -rf x` is
//! Tier 2.

use serde::{Deserialize, Serialize};

use sdk::event::Action;

/// Risk tier classification for actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    /// Read-only
    Tier0 = 0,
    /// Write/reversible
    Tier1 = 1,
    /// Destructive/irreversible
    Tier2 = 2,
}

const READ_ONLY_PROGRAMS: &[&str] = &[
    "ls", "cat", "head", "tail", "pwd", "echo", "grep", "rg", "find", "wc", "which", "tree",
    "stat", "file", "du", "df", "env", "printenv", "date", "whoami", "uname",
];

const READ_ONLY_GIT: &[&str] = &["status", "log", "diff", "show", "branch", "remote"];

const DESTRUCTIVE_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "shred", "sudo", "su", "chmod", "chown", "kill", "killall",
    "pkill", "shutdown", "reboot", "truncate",
];

const DESTRUCTIVE_GIT: &[&str] = &["push", "reset", "clean", "rebase"];

const DANGEROUS_FLAGS: &[&str] = &["--force", "-rf", "-fr", "--delete", "--hard", "--no-preserve-root"];

/// Separators that start a new command within one shell line
const SEGMENT_SEPARATORS: &[&str] = &["&&", "||", ";", "|", "\n"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, action: &Action) -> RiskTier {
        match action {
            Action::CmdRun { command } => self.assess_command(command),
            Action::FileEdit { .. } => RiskTier::Tier1,
            action if action.is_read_only() => RiskTier::Tier0,
            _ => RiskTier::Tier1,
        }
    }

    fn assess_command(&self, command: &str) -> RiskTier {
        if has_dangerous_flags(command) {
            return RiskTier::Tier2;
        }
        split_segments(command)
            .iter()
            .map(|segment| classify_segment(segment))
            .max()
            .unwrap_or(RiskTier::Tier0)
    }
}

fn split_segments(command: &str) -> Vec<String> {
    let mut segments = vec![command.to_string()];
    for separator in SEGMENT_SEPARATORS {
        segments = segments
            .iter()
            .flat_map(|segment| segment.split(separator).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }
    segments
        .into_iter()
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn classify_segment(segment: &str) -> RiskTier {
    // Output redirection writes a file
    let writes = segment.contains('>');
    let mut words = segment.split_whitespace();
    let program = words.next().unwrap_or_default();
    let program = program.rsplit('/').next().unwrap_or(program);

    if DESTRUCTIVE_PROGRAMS.contains(&program) {
        return RiskTier::Tier2;
    }
    if program == "git" {
        let subcommand = words.next().unwrap_or_default();
        if DESTRUCTIVE_GIT.contains(&subcommand) {
            return RiskTier::Tier2;
        }
        if READ_ONLY_GIT.contains(&subcommand) && !writes {
            return RiskTier::Tier0;
        }
        return RiskTier::Tier1;
    }
    if READ_ONLY_PROGRAMS.contains(&program) && !writes {
        return RiskTier::Tier0;
    }
    RiskTier::Tier1
}

fn has_dangerous_flags(command: &str) -> bool {
    command
        .split_whitespace()
        .any(|word| DANGEROUS_FLAGS.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(command: &str) -> RiskTier {
        RiskAssessor::new().assess(&Action::CmdRun {
            command: command.to_string(),
        })
    }

    #[test]
    fn test_tier0_commands() {
        for command in ["ls -la", "cat Cargo.toml", "git status", "git log --oneline", "/bin/echo hi"] {
            assert_eq!(run(command), RiskTier::Tier0, "{}", command);
        }
    }

    #[test]
    fn test_tier1_commands() {
        for command in ["cargo test", "npm install", "git commit -m wip", "echo hi > out.txt"] {
            assert_eq!(run(command), RiskTier::Tier1, "{}", command);
        }
    }

    #[test]
    fn test_tier2_commands() {
        for command in [
            "rm file.txt",
            "git push origin main",
            "git reset --hard HEAD~1",
            "sudo apt install x",
            "cargo build --force",
            "ls && rm -rf target",
            "cat log | sudo tee /etc/x",
        ] {
            assert_eq!(run(command), RiskTier::Tier2, "{}", command);
        }
    }

    #[test]
    fn test_non_command_actions() {
        let assessor = RiskAssessor::new();
        assert_eq!(
            assessor.assess(&Action::FileRead { path: "a".into() }),
            RiskTier::Tier0
        );
        assert_eq!(
            assessor.assess(&Action::FileEdit {
                path: "a".into(),
                old_str: None,
                new_str: "b".into()
            }),
            RiskTier::Tier1
        );
    }
}
