//! Configuration management
//!
//! This module handles loading, validation, and management of the crew configuration.
//! Configuration is stored in TOML format at ~/.crew/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace, session root, log level, root agent
//! - **llm**: OpenAI-compatible endpoint, model and retry settings
//! - **control**: Confirmation policy, timeouts, stuck policy, monitoring flags
//! - **agents**: Registered agents keyed by name
//! - **delegation**: `<agent>_can_delegate_to` rules
//!
//! Every table rejects unknown keys so typos surface as configuration errors
//! instead of silently falling back to defaults.
//!
//! # Environment Overrides
//!
//! | Variable | Effect |
//! |---|---|
//! | `CREW_LLM_BASE_URL` | overrides `llm.base_url` |
//! | `CREW_LLM_API_KEY` | API key sent as a bearer token |
//! | `CREW_PROMPT_TOKEN` | optional token for fetching prompt templates |
//! | `CREW_LOG` | overrides `core.log_level` (also accepts filter directives) |
//! | `CREW_SESSION_ROOT` | overrides `core.session_root` |
//!
//! # Examples
//!
//! ```no_run
//! use crew_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Root agent: {}", config.core.root_agent);
//! # Ok(())
//! # }
//! ```

mod delegation;

pub use delegation::DelegationMatrix;

use sdk::errors::EngineError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tool names an agent may enable. `delegate` and `finish` are implicit.
pub const TOOL_NAMES: [&str; 5] = ["run", "edit", "read", "think", "browse"];

/// Agent classes the registry knows how to build
pub const AGENT_CLASSES: [&str; 1] = ["llm"];

/// Suffix of every key in the `[delegation]` table
pub const DELEGATION_KEY_SUFFIX: &str = "_can_delegate_to";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Control plane policy
    #[serde(default)]
    pub control: ControlConfig,

    /// Registered agents keyed by name
    #[serde(default = "default_agents")]
    pub agents: BTreeMap<String, AgentConfig>,

    /// Extra delegation rules, `<agent>_can_delegate_to = [..]`
    #[serde(default)]
    pub delegation: BTreeMap<String, Vec<String>>,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// Workspace directory the runtime operates in (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Directory holding one sub-directory per session (supports ~ expansion)
    #[serde(default = "default_session_root")]
    pub session_root: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Agent that receives the user's task
    #[serde(default = "default_root_agent")]
    pub root_agent: String,

    /// Directory searched for `prompt_template_filename` (supports ~ expansion)
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Directory of keyword-triggered knowledge files (supports ~ expansion)
    #[serde(default = "default_microagents_dir")]
    pub microagents_dir: PathBuf,

    /// Append repository/runtime context on the first user message
    #[serde(default = "default_true")]
    pub memory_enabled: bool,
}

/// OpenAI-compatible LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LLMConfig {
    /// Base URL of the chat completions API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Attempts per LLM call, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay of the exponential backoff between attempts
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Timeout of a single HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Cost per 1000 tokens, used for the budget monitor
    #[serde(default = "default_cost_per_1k_tokens")]
    pub cost_per_1k_tokens: f64,

    /// Token budget for the condensed history sent with each step
    #[serde(default = "default_context_limit_tokens")]
    pub context_limit_tokens: usize,

    /// API key, only ever read from `CREW_LLM_API_KEY`
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Prompt-service token, only ever read from `CREW_PROMPT_TOKEN`
    #[serde(skip)]
    pub prompt_token: Option<String>,
}

/// Whether write actions need the user's approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationMode {
    /// Never ask
    Off,
    /// Ask for actions assessed as destructive
    On,
    /// Ask for every write action
    Always,
}

/// Decision taken when a confirmation prompt times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationDefault {
    Deny,
    Approve,
}

/// Response of the controller to a stuck alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StuckPolicy {
    /// End the agent in the `stuck` state
    Abort,
    /// Append a corrective note and let the agent try again
    Continue,
}

/// Control plane policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    #[serde(default = "default_confirmation_mode")]
    pub confirmation_mode: ConfirmationMode,

    /// Ask before every delegation (accepts true/false or "on"/"off")
    #[serde(default, deserialize_with = "deserialize_switch")]
    pub agent_switch_confirmation: bool,

    /// Record every delegation push/pop as an audit event
    #[serde(default = "default_true", deserialize_with = "deserialize_switch")]
    pub agent_switch_logging: bool,

    /// Iterations after which a warning is logged. Never stops the agent.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// Accumulated cost after which a warning is logged. Never stops the agent.
    #[serde(default = "default_max_budget")]
    pub max_budget: f64,

    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default_confirmation_default")]
    pub confirmation_default: ConfirmationDefault,

    #[serde(default = "default_stuck_policy")]
    pub stuck_policy: StuckPolicy,

    /// Number of action/observation pairs the stuck detector inspects
    #[serde(default = "default_stuck_window")]
    pub stuck_window: usize,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// One registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Implementation class (`llm`)
    #[serde(default = "default_agent_class")]
    pub class: String,

    /// System prompt file, relative to `core.prompts_dir`
    #[serde(default)]
    pub prompt_template_filename: Option<String>,

    /// Subset of `run`, `edit`, `read`, `think`, `browse`
    #[serde(default = "default_tools_enabled")]
    pub tools_enabled: Vec<String>,

    /// Agents this agent may delegate to
    #[serde(default)]
    pub delegation_allowlist: Vec<String>,

    /// One-line description shown to delegating agents
    #[serde(default)]
    pub description: String,
}

impl ControlConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl LLMConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Accepts `true`/`false` as well as `"on"`/`"off"`.
fn deserialize_switch<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Switch {
        Bool(bool),
        Text(String),
    }

    match Switch::deserialize(deserializer)? {
        Switch::Bool(value) => Ok(value),
        Switch::Text(text) => match text.to_ascii_lowercase().as_str() {
            "on" | "true" => Ok(true),
            "off" | "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected \"on\" or \"off\", found \"{}\"",
                other
            ))),
        },
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_session_root() -> PathBuf {
    PathBuf::from("~/.crew/sessions")
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("~/.crew/prompts")
}

fn default_microagents_dir() -> PathBuf {
    PathBuf::from("~/.crew/microagents")
}

fn default_root_agent() -> String {
    "orchestrator".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_cost_per_1k_tokens() -> f64 {
    0.002
}

fn default_context_limit_tokens() -> usize {
    16_000
}

fn default_confirmation_mode() -> ConfirmationMode {
    ConfirmationMode::Off
}

fn default_max_iterations() -> u64 {
    100
}

fn default_max_budget() -> f64 {
    5.0
}

fn default_action_timeout_secs() -> u64 {
    300
}

fn default_inactivity_timeout_secs() -> u64 {
    120
}

fn default_confirmation_timeout_secs() -> u64 {
    30
}

fn default_confirmation_default() -> ConfirmationDefault {
    ConfirmationDefault::Deny
}

fn default_stuck_policy() -> StuckPolicy {
    StuckPolicy::Abort
}

fn default_stuck_window() -> usize {
    6
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_agent_class() -> String {
    "llm".to_string()
}

fn default_tools_enabled() -> Vec<String> {
    TOOL_NAMES.iter().map(|tool| tool.to_string()).collect()
}

fn specialist(description: &str, tools: &[&str]) -> AgentConfig {
    AgentConfig {
        class: default_agent_class(),
        prompt_template_filename: None,
        tools_enabled: tools.iter().map(|tool| tool.to_string()).collect(),
        delegation_allowlist: Vec::new(),
        description: description.to_string(),
    }
}

fn default_agents() -> BTreeMap<String, AgentConfig> {
    let mut agents = BTreeMap::new();
    agents.insert(
        "requirements".to_string(),
        specialist(
            "Clarifies the task and writes down requirements",
            &["read", "think", "edit"],
        ),
    );
    agents.insert(
        "ui_ux".to_string(),
        specialist(
            "Designs screens, flows and styling",
            &["read", "think", "edit", "browse"],
        ),
    );
    agents.insert(
        "data_modeling".to_string(),
        specialist(
            "Designs schemas, migrations and data access",
            &["read", "think", "edit", "run"],
        ),
    );
    agents.insert(
        "implementation".to_string(),
        specialist("Writes and changes code", &TOOL_NAMES),
    );
    agents.insert(
        "debug".to_string(),
        specialist("Reproduces and fixes failures", &TOOL_NAMES),
    );
    agents.insert(
        "deploy".to_string(),
        specialist("Builds, packages and deploys", &["read", "think", "run"]),
    );
    agents.insert(
        "refactor".to_string(),
        specialist(
            "Restructures code without changing behavior",
            &["read", "think", "edit", "run"],
        ),
    );

    let children: Vec<String> = agents.keys().cloned().collect();
    agents.insert(
        "orchestrator".to_string(),
        AgentConfig {
            class: default_agent_class(),
            prompt_template_filename: None,
            tools_enabled: vec!["read".to_string(), "think".to_string()],
            delegation_allowlist: children,
            description: "Plans the work and delegates it to specialists".to_string(),
        },
    );
    agents
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            session_root: default_session_root(),
            log_level: default_log_level(),
            root_agent: default_root_agent(),
            prompts_dir: default_prompts_dir(),
            microagents_dir: default_microagents_dir(),
            memory_enabled: true,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            cost_per_1k_tokens: default_cost_per_1k_tokens(),
            context_limit_tokens: default_context_limit_tokens(),
            api_key: None,
            prompt_token: None,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            confirmation_mode: default_confirmation_mode(),
            agent_switch_confirmation: false,
            agent_switch_logging: true,
            max_iterations: default_max_iterations(),
            max_budget: default_max_budget(),
            action_timeout_secs: default_action_timeout_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            confirmation_default: default_confirmation_default(),
            stuck_policy: default_stuck_policy(),
            stuck_window: default_stuck_window(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            class: default_agent_class(),
            prompt_template_filename: None,
            tools_enabled: default_tools_enabled(),
            delegation_allowlist: Vec::new(),
            description: String::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    /// Load configuration from the default location (~/.crew/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Environment overrides are applied before validation.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the file cannot be read, contains
    /// unknown keys, or fails validation.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load from `path` when given, otherwise from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load_or_create(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate_and_process()?;

        Ok(config)
    }

    /// Parse configuration text without touching the environment or disk
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default_config();

        // The file keeps the unexpanded defaults; env overrides stay out of it
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.crew/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".crew").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            control: ControlConfig::default(),
            agents: default_agents(),
            delegation: BTreeMap::new(),
        }
    }

    /// Apply `CREW_*` environment overrides. Unknown variables are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(base_url) = non_empty("CREW_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(api_key) = non_empty("CREW_LLM_API_KEY") {
            self.llm.api_key = Some(api_key);
        }
        if let Some(token) = non_empty("CREW_PROMPT_TOKEN") {
            self.llm.prompt_token = Some(token);
        }
        if let Some(level) = non_empty("CREW_LOG") {
            self.core.log_level = level;
        }
        if let Some(root) = non_empty("CREW_SESSION_ROOT") {
            self.core.session_root = PathBuf::from(root);
        }
    }

    /// Delegation matrix: the union of every agent's allowlist and the
    /// `[delegation]` rules.
    pub fn delegation_matrix(&self) -> DelegationMatrix {
        let mut matrix = DelegationMatrix::default();
        for (name, agent) in &self.agents {
            for child in &agent.delegation_allowlist {
                matrix.allow(name, child);
            }
        }
        for (key, children) in &self.delegation {
            if let Some(name) = key.strip_suffix(DELEGATION_KEY_SUFFIX) {
                for child in children {
                    matrix.allow(name, child);
                }
            }
        }
        matrix
    }

    /// Validate references and expand paths
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` for invalid log levels, unknown agent
    /// classes or tools, delegation rules naming unregistered agents, an
    /// unregistered root agent, zero timeouts, or an unusable workspace.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;
        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        self.core.session_root = expand_path(&self.core.session_root)?;
        self.core.prompts_dir = expand_path(&self.core.prompts_dir)?;
        self.core.microagents_dir = expand_path(&self.core.microagents_dir)?;

        Ok(())
    }

    /// Validation that needs neither the filesystem nor the environment
    pub fn validate(&self) -> Result<(), EngineError> {
        // `CREW_LOG` may carry a filter directive such as "crew_engine=debug"
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !self.core.log_level.contains('=')
            && !valid_log_levels.contains(&self.core.log_level.as_str())
        {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.agents.is_empty() {
            return Err(EngineError::Config("No agents registered".to_string()));
        }

        if !self.agents.contains_key(&self.core.root_agent) {
            return Err(EngineError::Config(format!(
                "Root agent '{}' is not registered under [agents]",
                self.core.root_agent
            )));
        }

        for (name, agent) in &self.agents {
            if !AGENT_CLASSES.contains(&agent.class.as_str()) {
                return Err(EngineError::Config(format!(
                    "Agent '{}' has unknown class '{}'. Must be one of: {}",
                    name,
                    agent.class,
                    AGENT_CLASSES.join(", ")
                )));
            }
            for tool in &agent.tools_enabled {
                if !TOOL_NAMES.contains(&tool.as_str()) {
                    return Err(EngineError::Config(format!(
                        "Agent '{}' enables unknown tool '{}'. Must be one of: {}",
                        name,
                        tool,
                        TOOL_NAMES.join(", ")
                    )));
                }
            }
            for child in &agent.delegation_allowlist {
                if !self.agents.contains_key(child) {
                    return Err(EngineError::Config(format!(
                        "Agent '{}' may delegate to unregistered agent '{}'",
                        name, child
                    )));
                }
            }
        }

        for (key, children) in &self.delegation {
            let name = key.strip_suffix(DELEGATION_KEY_SUFFIX).ok_or_else(|| {
                EngineError::Config(format!(
                    "Unknown key '{}' in [delegation]. Expected '<agent>{}'",
                    key, DELEGATION_KEY_SUFFIX
                ))
            })?;
            if !self.agents.contains_key(name) {
                return Err(EngineError::Config(format!(
                    "[delegation] rule '{}' names unregistered agent '{}'",
                    key, name
                )));
            }
            for child in children {
                if !self.agents.contains_key(child) {
                    return Err(EngineError::Config(format!(
                        "[delegation] rule '{}' names unregistered agent '{}'",
                        key, child
                    )));
                }
            }
        }

        let control = &self.control;
        for (field, value) in [
            ("action_timeout_secs", control.action_timeout_secs),
            ("inactivity_timeout_secs", control.inactivity_timeout_secs),
            ("confirmation_timeout_secs", control.confirmation_timeout_secs),
            ("tick_interval_ms", control.tick_interval_ms),
        ] {
            if value == 0 {
                return Err(EngineError::Config(format!(
                    "control.{} must be greater than 0",
                    field
                )));
            }
        }
        if control.stuck_window < 4 {
            return Err(EngineError::Config(
                "control.stuck_window must be at least 4".to_string(),
            ));
        }
        if self.llm.max_attempts == 0 {
            return Err(EngineError::Config(
                "llm.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub(crate) fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize().map_err(|e| {
        EngineError::Config(format!("Failed to canonicalize {:?}: {}", path, e))
    })
}
