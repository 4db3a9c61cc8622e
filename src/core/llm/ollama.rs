use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{ChatRequest, EngineHealth, LlmProvider, Message, ToolCall, ToolSpec};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

// ── /api/chat request ──

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool<'a>>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Serialize, Deserialize, Default)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ── /api/chat and /api/tags responses ──

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModelTag>,
}

#[derive(Deserialize)]
struct OllamaModelTag {
    #[serde(default)]
    name: String,
}

// ── Provider ──

pub struct OllamaProvider {
    endpoint: String,
    model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            client: Client::new(),
        }
    }

    fn to_wire(system: &str, messages: &[Message]) -> Vec<OllamaMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(OllamaMessage {
            role: "system".into(),
            content: system.to_string(),
            ..Default::default()
        });
        for m in messages {
            out.push(match m {
                Message::Human(text) => OllamaMessage {
                    role: "user".into(),
                    content: text.clone(),
                    ..Default::default()
                },
                Message::Assistant {
                    content,
                    tool_calls,
                } => OllamaMessage {
                    role: "assistant".into(),
                    content: content.clone(),
                    tool_calls: tool_calls
                        .iter()
                        .map(|c| OllamaToolCall {
                            function: OllamaFunction {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                        .collect(),
                    ..Default::default()
                },
                Message::ToolResult(r) => OllamaMessage {
                    role: "tool".into(),
                    content: r.content.clone(),
                    tool_name: Some(r.name.clone()),
                    ..Default::default()
                },
            });
        }
        out
    }
}

/// Some models return arguments as a JSON string instead of an object.
fn normalize_arguments(raw: Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str::<Value>(&s)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Default::default())),
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

/// A tag matches when its base name (before `:`) equals the configured
/// model or starts with it.
fn model_matches(tags: &[String], model: &str) -> bool {
    let wanted = model.split(':').next().unwrap_or(model);
    tags.iter().any(|t| t == wanted || t.starts_with(wanted))
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Message> {
        let body = OllamaChatRequest {
            model: &self.model,
            messages: Self::to_wire(&request.system, &request.messages),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
            },
            tools: request
                .tools
                .iter()
                .map(|t| OllamaTool {
                    kind: "function",
                    function: t,
                })
                .collect(),
        };

        let url = format!("{}/api/chat", self.endpoint);
        debug!("POST {} ({} tools)", url, request.tools.len());
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Cannot reach inference engine at {}: {}", self.endpoint, e))?;

        if !res.status().is_success() {
            return Err(anyhow!(
                "Ollama API Error ({}): {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }

        let parsed: OllamaChatResponse = res.json().await?;
        let tool_calls = parsed
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: c.function.name,
                arguments: normalize_arguments(c.function.arguments),
            })
            .collect();

        Ok(Message::Assistant {
            content: parsed.message.content,
            tool_calls,
        })
    }

    async fn health(&self) -> EngineHealth {
        let down = EngineHealth {
            model: self.model.clone(),
            ..Default::default()
        };

        let url = format!("{}/api/tags", self.endpoint);
        let res = match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return down,
        };
        let Ok(tags) = res.json::<OllamaTags>().await else {
            return down;
        };

        let names: Vec<String> = tags
            .models
            .into_iter()
            .map(|m| m.name.split(':').next().unwrap_or_default().to_string())
            .collect();

        EngineHealth {
            running: true,
            model_available: model_matches(&names, &self.model),
            model: self.model.clone(),
            available_models: names,
        }
    }
}
