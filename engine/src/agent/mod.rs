//! Agents
//!
//! An agent turns a history view into exactly one next action. Agents hold
//! no state across steps; everything they know comes from the view and the
//! [`AgentSpec`] they were built with. The registry is built once at session
//! start from the configuration and injected into the controllers.

pub mod llm_agent;
pub mod prompt;
pub mod tools;
pub mod working_memory;

pub use llm_agent::LlmAgent;
pub use tools::DelegateTarget;
pub use working_memory::WorkingMemory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::event::{Action, LlmMetrics};

use crate::config::Config;
use crate::llm::{LLMProvider, RetryConfig};
use crate::state::HistoryView;

/// The action chosen by one step, with the usage of the call that chose it
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub action: Action,
    pub metrics: Option<LlmMetrics>,
}

impl StepOutcome {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LlmMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Static description of a registered agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub tools_enabled: Vec<String>,
    pub delegates: Vec<DelegateTarget>,
    pub context_limit_tokens: usize,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Chooses the next action. Failures are reported as `Error` actions,
    /// never as panics or `Err`.
    async fn step(&self, view: &HistoryView<'_>) -> StepOutcome;
}

/// Agents by name
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one agent per `[agents.<name>]` entry
    pub fn from_config(config: &Config, provider: Arc<dyn LLMProvider>) -> Result<Self, EngineError> {
        let matrix = config.delegation_matrix();
        let retry = RetryConfig::from_config(&config.llm);
        let mut registry = Self::new();

        for (name, agent) in &config.agents {
            if agent.class != "llm" {
                return Err(EngineError::Config(format!(
                    "Agent '{}' has unknown class '{}'",
                    name, agent.class
                )));
            }

            let delegates = matrix
                .children(name)
                .into_iter()
                .map(|child| DelegateTarget {
                    description: config
                        .agents
                        .get(&child)
                        .map(|c| c.description.clone())
                        .unwrap_or_default(),
                    name: child,
                })
                .collect();

            let spec = AgentSpec {
                name: name.clone(),
                description: agent.description.clone(),
                system_prompt: prompt::load_system_prompt(
                    &config.core.prompts_dir,
                    agent.prompt_template_filename.as_deref(),
                    name,
                    &agent.description,
                ),
                tools_enabled: agent.tools_enabled.clone(),
                delegates,
                context_limit_tokens: config.llm.context_limit_tokens,
            };

            registry.insert(Arc::new(LlmAgent::new(
                spec,
                Arc::clone(&provider),
                retry.clone(),
            )));
        }

        Ok(registry)
    }

    /// Registers `agent` under its own name, replacing any previous entry
    pub fn insert(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, Message, ToolSpec};

    struct NoProvider;

    #[async_trait]
    impl LLMProvider for NoProvider {
        fn name(&self) -> &str {
            "none"
        }

        fn is_local(&self) -> bool {
            true
        }

        fn estimated_cost(&self, _tokens: u64) -> f64 {
            0.0
        }

        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[ToolSpec],
        ) -> crate::llm::Result<Completion> {
            Err(crate::llm::LLMError::ProviderUnavailable("offline".into()))
        }
    }

    #[test]
    fn test_registry_builds_every_configured_agent() {
        let config = Config::default_config();
        let registry = AgentRegistry::from_config(&config, Arc::new(NoProvider)).unwrap();

        for name in config.agents.keys() {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert_eq!(registry.names().count(), config.agents.len());
        assert!(registry.get("nobody").is_none());
    }
}
