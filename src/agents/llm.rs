//! LLM adapter: the only component that sees agent credentials
//!
//! Speaks the chat-completions HTTP contract directly. Every call is
//! deadline-bounded; callers turn failures into fallback text and never
//! leak provider errors to the customer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::{Error, Result};

/// One turn of conversation context
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl ChatTurn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// A tool advertised to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// One agent invocation
pub struct LlmRequest<'a> {
    /// Credential handle; `None` uses the process default
    pub api_key: Option<&'a str>,
    pub provider_account: Option<&'a str>,
    pub system_prompt: &'a str,
    pub history: Vec<ChatTurn>,
    pub user_message: String,
    pub tools: &'a [ToolSpec],
    pub max_tokens: u32,
}

/// What the model produced
#[derive(Debug, Clone)]
pub enum LlmOutcome {
    Text(String),
    ToolCall { name: String, arguments: serde_json::Value },
}

/// The seam the registry calls through; tests script it
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn respond(&self, request: LlmRequest<'_>) -> Result<LlmOutcome>;
}

/// Production client over a chat-completions endpoint
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    default_api_key: Option<String>,
    model: String,
    deadline: Duration,
}

impl HttpLlmClient {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            default_api_key: config.api_key.clone(),
            model: config.model.clone(),
            deadline: config.deadline,
        }
    }
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallPayload>,
}

#[derive(Deserialize)]
struct ToolCallPayload {
    function: FunctionPayload,
}

#[derive(Deserialize)]
struct FunctionPayload {
    name: String,
    arguments: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn respond(&self, request: LlmRequest<'_>) -> Result<LlmOutcome> {
        let api_key = request
            .api_key
            .map(String::from)
            .or_else(|| self.default_api_key.clone())
            .ok_or_else(|| Error::Agent("no LLM credential configured".to_string()))?;

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        }));
        for turn in &request.history {
            messages.push(serde_json::json!({
                "role": turn.role,
                "content": turn.content,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": request.user_message,
        }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
            "max_tokens": request.max_tokens,
        });
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&api_key)
            .json(&body);
        if let Some(account) = request.provider_account {
            builder = builder.header("OpenAI-Organization", account);
        }

        let response = tokio::time::timeout(self.deadline, builder.send())
            .await
            .map_err(|_| Error::Unavailable("LLM deadline exceeded".to_string()))??;

        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "LLM provider returned {}",
                response.status()
            )));
        }

        let completion: Completion = response.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Agent("LLM returned no choices".to_string()))?;

        if let Some(call) = choice.message.tool_calls.into_iter().next() {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::Null);
            return Ok(LlmOutcome::ToolCall {
                name: call.function.name,
                arguments,
            });
        }

        let text = choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Agent("LLM returned empty content".to_string()))?;

        Ok(LlmOutcome::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_parse() {
        let payload = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "function": {
                            "name": "schedule_meeting",
                            "arguments": "{\"date\":\"2025-12-02\",\"time\":\"14:00\"}"
                        }
                    }]
                }
            }]
        }"#;
        let completion: Completion = serde_json::from_str(payload).unwrap();
        let call = &completion.choices[0].message.tool_calls[0];
        assert_eq!(call.function.name, "schedule_meeting");
    }

    #[test]
    fn plain_text_completion_parses() {
        let payload = r#"{"choices":[{"message":{"content":"Olá!"}}]}"#;
        let completion: Completion = serde_json::from_str(payload).unwrap();
        assert_eq!(
            completion.choices[0].message.content.as_deref(),
            Some("Olá!")
        );
    }
}
