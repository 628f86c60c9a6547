//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for chat-completion providers.
//! The `LLMProvider` trait is the seam the agents depend on; the shipped
//! implementation talks to any OpenAI-compatible endpoint, and tests use
//! scripted providers or a mock HTTP server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod openai;
pub mod retry;

pub use retry::{with_retry, RetryConfig};

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LLMError {
    /// Errors worth another attempt after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::ProviderUnavailable(_)
                | LLMError::RateLimitExceeded
                | LLMError::NetworkError(_)
                | LLMError::Timeout
        )
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LLMResponse {
    /// LLM wants to call a tool
    ToolCall(ToolCall),

    /// LLM has answered in plain text
    FinalAnswer(FinalAnswer),
}

/// Tool call request from the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (JSON string)
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Plain text answer from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// The answer content
    pub content: String,
}

impl FinalAnswer {
    /// Create a new final answer
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One completed LLM call
#[derive(Debug, Clone)]
pub struct Completion {
    pub response: LLMResponse,
    pub usage: Usage,
}

/// A chat model endpoint
#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the model runs on this machine
    fn is_local(&self) -> bool;

    /// Estimated cost in USD of `tokens` prompt plus completion tokens
    fn estimated_cost(&self, tokens: u64) -> f64;

    /// One completion for `messages`. `tools` may be empty, in which case
    /// the model can only answer in text.
    async fn generate(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Completion>;
}

/// Recovers a tool call that a model wrote into its text answer.
///
/// Accepted shapes, in order: the whole answer is a
/// `{"function": .., "arguments": {..}}` object, the object sits in the
/// first code fence, or it is embedded in prose.
pub fn parse_tool_calls(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();
    function_object(trimmed)
        .or_else(|| fenced_block(trimmed).and_then(|block| function_object(block.trim())))
        .or_else(|| {
            let start = trimmed.find("{\"function\"")?;
            balanced_object(&trimmed[start..]).and_then(function_object)
        })
}

pub(crate) fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4())
}

fn function_object(text: &str) -> Option<ToolCall> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let name = value.get("function")?.as_str()?;
    let arguments = value.get("arguments")?;
    Some(ToolCall::new(new_call_id(), name, arguments.to_string()))
}

/// Body of the first code fence, without its language tag line
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")? + 3;
    let body = open + text[open..].find('\n')? + 1;
    let close = body + text[body..].find("```")?;
    (body < close).then(|| &text[body..close])
}

/// The JSON object starting at the first byte of `text`, up to its
/// matching brace. Braces inside string literals are ignored.
fn balanced_object(text: &str) -> Option<&str> {
    if !text.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
