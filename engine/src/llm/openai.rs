use super::{
    Completion, FinalAnswer, LLMError, LLMProvider, LLMResponse, Message, ToolCall, ToolSpec,
    Usage,
};
use crate::config::LLMConfig;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Any endpoint speaking the OpenAI chat completions protocol
pub struct OpenAIProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> super::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LLMError::Unknown(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn payload(&self, messages: &[Message], tools: &[ToolSpec]) -> serde_json::Value {
        let api_messages: Vec<_> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let mut payload = json!({
            "model": self.config.model,
            "messages": api_messages,
        });

        if !tools.is_empty() {
            let api_tools: Vec<_> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            payload["tools"] = json!(api_tools);
        }

        payload
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    fn estimated_cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * self.config.cost_per_1k_tokens
    }

    async fn generate(&self, messages: &[Message], tools: &[ToolSpec]) -> super::Result<Completion> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.payload(messages, tools));
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LLMError::Timeout
            } else {
                LLMError::NetworkError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::ProviderUnavailable(format!("{}: {}", status, text)),
                _ => LLMError::InvalidRequest(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        parse_completion(&data)
    }
}

/// Extracts the first choice and the usage block of a chat completion
fn parse_completion(data: &serde_json::Value) -> super::Result<Completion> {
    let usage = data
        .get("usage")
        .map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
        .unwrap_or_default();

    let choice = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| LLMError::ParseError("No message in choice".to_string()))?;

    if let Some(call) = message
        .get("tool_calls")
        .and_then(|calls| calls.as_array())
        .and_then(|calls| calls.first())
    {
        let function = call
            .get("function")
            .ok_or_else(|| LLMError::ParseError("Tool call without function".to_string()))?;
        let name = function
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| LLMError::ParseError("Tool call without name".to_string()))?;
        let arguments = match function.get("arguments") {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => "{}".to_string(),
        };
        let id = call
            .get("id")
            .and_then(|i| i.as_str())
            .map(str::to_string)
            .unwrap_or_else(super::new_call_id);

        debug!(tool = %name, "Model requested a tool call");
        return Ok(Completion {
            response: LLMResponse::ToolCall(ToolCall::new(id, name, arguments)),
            usage,
        });
    }

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))?;

    let response = match super::parse_tool_calls(content) {
        Some(tool_call) => LLMResponse::ToolCall(tool_call),
        None => LLMResponse::FinalAnswer(FinalAnswer::new(content)),
    };
    Ok(Completion { response, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_tool_call_with_usage() {
        let data = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "run", "arguments": "{\"command\":\"ls\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8}
        });

        let completion = parse_completion(&data).unwrap();
        assert_eq!(completion.usage.total(), 128);
        match completion.response {
            LLMResponse::ToolCall(call) => {
                assert_eq!(call.id, "call_1");
                assert_eq!(call.name, "run");
                assert_eq!(call.arguments, "{\"command\":\"ls\"}");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_content_is_final_answer() {
        let data = json!({
            "choices": [{"message": {"content": "Which framework?"}}]
        });

        let completion = parse_completion(&data).unwrap();
        assert_eq!(completion.usage, Usage::default());
        assert!(matches!(
            completion.response,
            LLMResponse::FinalAnswer(ref answer) if answer.content == "Which framework?"
        ));
    }

    #[test]
    fn test_missing_choices_is_parse_error() {
        assert!(matches!(
            parse_completion(&json!({"usage": {}})),
            Err(LLMError::ParseError(_))
        ));
    }

    #[test]
    fn test_tools_are_sent_as_functions() {
        let provider = OpenAIProvider::new(LLMConfig::default()).unwrap();
        let payload = provider.payload(
            &[Message::user("hi")],
            &[ToolSpec {
                name: "think".into(),
                description: "Record a thought".into(),
                parameters: json!({"type": "object"}),
            }],
        );
        assert_eq!(payload["tools"][0]["type"], "function");
        assert_eq!(payload["tools"][0]["function"]["name"], "think");
        assert_eq!(payload["messages"][0]["role"], "user");
    }
}
