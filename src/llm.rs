//! Inference provider boundary: OpenAI-compatible chat completions with
//! function calling, over reqwest.
//!
//! The engine only sees the [`Provider`] trait: submit a conversation plus
//! the tool definitions, get back either a final message or a structured
//! tool-call request. Everything provider-specific stays behind it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::config::{AgentConfig, ProviderKind};
use crate::error::{AgentError, Result};
use crate::tools::ToolDefinition;

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// The assistant message echoing a tool-call request back into history.
    pub fn assistant_tool_call(record: ToolCallRecord) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls: vec![record],
            tool_call_id: None,
        }
    }

    /// A tool result folded back into the conversation.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A tool call as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as the wire format carries it.
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// What a provider round-trip produced.
#[derive(Debug, Clone)]
pub enum ProviderReply {
    /// Plain final answer.
    Final(String),
    /// Structured request to invoke a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
}

/// The opaque inference collaborator. One round-trip: conversation + tool
/// definitions in, final answer or tool-call request out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
    ) -> Result<ProviderReply>;

    /// Model identifiers the endpoint offers, for the settings surface.
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// Append the OpenAI-compatible sub-path for loopback inference servers;
/// remote endpoints are left untouched.
pub fn normalize_endpoint(base_url: &str, kind: ProviderKind) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if kind == ProviderKind::Local && !trimmed.ends_with("/v1") {
        format!("{}/v1", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// HTTP implementation of [`Provider`].
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRecord>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl HttpProvider {
    /// Build a provider from a configuration snapshot.
    pub fn new(config: &AgentConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Provider(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: normalize_endpoint(&config.base_url, config.provider_kind),
            api_key: std::env::var("AGENT_API_KEY").unwrap_or_else(|_| "ollama".to_string()),
            model: config.model.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::ProviderTimeout
        } else {
            AgentError::Provider(e.to_string())
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
    ) -> Result<ProviderReply> {
        let url = format!("{}/chat/completions", self.endpoint);
        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            tools: tools
                .iter()
                .map(|t| serde_json::json!({"type": "function", "function": t}))
                .collect(),
            temperature: 0.2,
        };

        info!(model = %self.model, messages = messages.len(), "sending provider request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        let body = response.text().await.map_err(Self::classify)?;
        if !status.is_success() {
            return Err(AgentError::Provider(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AgentError::Provider(format!("malformed response: {}", e)))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AgentError::Provider("response carried no choices".to_string()))?;

        if let Some(call) = message.tool_calls.into_iter().next() {
            let id = if call.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                call.id
            };
            // Some servers send "" for no-arg tools; unparsable arguments
            // become Null so schema validation reports them back to the
            // model instead of killing the turn.
            let arguments = if call.function.arguments.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null)
            };
            return Ok(ProviderReply::ToolCall {
                id,
                name: call.function.name,
                arguments,
            });
        }

        Ok(ProviderReply::Final(message.content.unwrap_or_default()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.endpoint);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        let body = response.text().await.map_err(Self::classify)?;
        if !status.is_success() {
            return Err(AgentError::Provider(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ModelsResponse = serde_json::from_str(&body)
            .map_err(|e| AgentError::Provider(format!("malformed response: {}", e)))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_local_endpoint_appends_v1() {
        assert_eq!(
            normalize_endpoint("http://localhost:11434", ProviderKind::Local),
            "http://localhost:11434/v1"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:11434/", ProviderKind::Local),
            "http://localhost:11434/v1"
        );
        // Already normalized: left alone.
        assert_eq!(
            normalize_endpoint("http://localhost:11434/v1", ProviderKind::Local),
            "http://localhost:11434/v1"
        );
    }

    #[test]
    fn test_normalize_remote_endpoint_untouched() {
        assert_eq!(
            normalize_endpoint("https://api.example.com", ProviderKind::Remote),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_endpoint("https://api.example.com/openai/v1", ProviderKind::Remote),
            "https://api.example.com/openai/v1"
        );
    }

    #[test]
    fn test_provider_from_config_normalizes() {
        let provider = HttpProvider::new(
            &AgentConfig::default(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_message_serialization_shape() {
        let json = serde_json::to_value(ChatMessage::user("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        // Empty collections stay off the wire.
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());

        let json = serde_json::to_value(ChatMessage::tool_result("call_1", "{}")).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
    }

    #[test]
    fn test_response_with_tool_call_deserializes() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "list_caches", "arguments": "{}"}
                    }]
                }
            }]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let message = &parsed.choices[0].message;
        assert_eq!(message.tool_calls[0].function.name, "list_caches");
        assert!(message.content.is_none());
    }

    #[test]
    fn test_response_final_deserializes() {
        let body = r#"{"choices": [{"message": {"content": "All clean."}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("All clean.")
        );
        assert!(parsed.choices[0].message.tool_calls.is_empty());
    }
}
