//! CLI interface for crew
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for running and managing
//! sessions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-agent assistant
///
/// Runs a root agent in your workspace. The agent can run commands, read
/// and edit files, and delegate sub-tasks to other configured agents.
#[derive(Parser, Debug)]
#[command(name = "crew")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Start a new session
    Start {
        /// First message for the root agent; read from stdin when omitted
        task: Option<String>,
    },

    /// Resume a persisted session
    Resume {
        /// Session id, as shown by `crew sessions`
        id: String,
    },

    /// List sessions
    #[command(alias = "list")]
    Sessions,

    /// Remove old sessions
    Clean {
        /// Age threshold in days
        #[arg(long, value_name = "DAYS")]
        older_than: u32,

        /// Actually delete; without it the matching sessions are only listed
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_with_task() {
        let cli = Cli::parse_from(["crew", "start", "fix the build"]);
        assert_eq!(
            cli.command,
            Command::Start {
                task: Some("fix the build".to_string())
            }
        );
        assert!(!cli.json);
    }

    #[test]
    fn test_start_without_task() {
        let cli = Cli::parse_from(["crew", "start"]);
        assert_eq!(cli.command, Command::Start { task: None });
    }

    #[test]
    fn test_resume() {
        let cli = Cli::parse_from(["crew", "resume", "20261016-100000-abcd1234"]);
        assert_eq!(
            cli.command,
            Command::Resume {
                id: "20261016-100000-abcd1234".to_string()
            }
        );
    }

    #[test]
    fn test_list_alias() {
        let cli = Cli::parse_from(["crew", "list"]);
        assert_eq!(cli.command, Command::Sessions);
    }

    #[test]
    fn test_clean_defaults_to_dry_run() {
        let cli = Cli::parse_from(["crew", "clean", "--older-than", "30"]);
        assert_eq!(
            cli.command,
            Command::Clean {
                older_than: 30,
                force: false
            }
        );
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "crew",
            "sessions",
            "--json",
            "--log",
            "debug",
            "--config",
            "/tmp/crew.toml",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/crew.toml")));
    }

    #[test]
    fn test_clean_requires_threshold() {
        assert!(Cli::try_parse_from(["crew", "clean"]).is_err());
    }
}
