//! LLM-backed agent
//!
//! One step is one LLM call with tool calling enabled:
//!
//! - a tool call becomes the matching typed action
//! - plain text becomes a `Message` to the user
//! - a malformed tool call becomes `Error { kind: parse }`
//! - a call that still fails after the retries becomes `Error { kind: llm }`

use std::sync::Arc;

use async_trait::async_trait;
use sdk::event::{Action, ErrorKind, LlmMetrics};
use tracing::{debug, instrument, warn};

use super::{prompt, tools, Agent, AgentSpec, StepOutcome};
use crate::llm::{with_retry, LLMProvider, LLMResponse, RetryConfig, ToolSpec};
use crate::state::HistoryView;

pub struct LlmAgent {
    spec: AgentSpec,
    tools: Vec<ToolSpec>,
    provider: Arc<dyn LLMProvider>,
    retry: RetryConfig,
}

impl LlmAgent {
    pub fn new(spec: AgentSpec, provider: Arc<dyn LLMProvider>, retry: RetryConfig) -> Self {
        let tools = tools::tool_specs(&spec.tools_enabled, &spec.delegates);
        Self {
            spec,
            tools,
            provider,
            retry,
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    #[instrument(skip(self, view), fields(agent = %self.spec.name, events = view.events().len()))]
    async fn step(&self, view: &HistoryView<'_>) -> StepOutcome {
        let messages = prompt::build_messages(
            &self.spec.system_prompt,
            view,
            self.spec.context_limit_tokens,
        );

        let completion = match with_retry(&self.retry, || {
            self.provider.generate(&messages, &self.tools)
        })
        .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "LLM call failed");
                return StepOutcome::new(Action::Error {
                    kind: ErrorKind::Llm,
                    message: e.to_string(),
                });
            }
        };

        let metrics = LlmMetrics {
            prompt_tokens: completion.usage.prompt_tokens,
            completion_tokens: completion.usage.completion_tokens,
            cost: self.provider.estimated_cost(completion.usage.total()),
        };

        let action = match completion.response {
            LLMResponse::FinalAnswer(answer) => Action::Message {
                content: answer.content,
            },
            LLMResponse::ToolCall(call) => {
                match tools::action_from_call(&call, &self.spec.tools_enabled) {
                    Ok(action) => action,
                    Err(diagnostic) => {
                        warn!(tool = %call.name, %diagnostic, "Unusable tool call");
                        Action::Error {
                            kind: ErrorKind::Parse,
                            message: diagnostic,
                        }
                    }
                }
            }
        };

        debug!(action = %action.summary(), "Step complete");
        StepOutcome::new(action).with_metrics(metrics)
    }
}
