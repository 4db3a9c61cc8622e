pub mod ollama;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::settings::{EngineSettings, SettingsStore};

/// Sampling temperature used whenever tools are bound. Kept low so the
/// model formats tool calls deterministically, regardless of user settings.
pub const TOOL_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    /// Correlation id, matched by exactly one [`ToolResult`].
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Human(String),
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult(ToolResult),
}

impl Message {
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Function schema offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineHealth {
    pub running: bool,
    pub model_available: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_models: Vec<String>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    // One request/response exchange: plain text or tool calls back.
    async fn chat(&self, request: &ChatRequest) -> Result<Message>;

    async fn health(&self) -> EngineHealth;
}

/// Builds a provider handle from one settings snapshot.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, settings: &EngineSettings) -> Arc<dyn LlmProvider>;
}

pub struct OllamaFactory;

impl ProviderFactory for OllamaFactory {
    fn build(&self, settings: &EngineSettings) -> Arc<dyn LlmProvider> {
        Arc::new(ollama::OllamaProvider::new(
            settings.endpoint.clone(),
            settings.model.clone(),
        ))
    }
}

/// One request/response call per dispatch step. The provider handle is
/// cached together with the settings version it came from and rebuilt as
/// soon as the version moves.
pub struct CompletionEngine {
    settings: Arc<SettingsStore>,
    factory: Arc<dyn ProviderFactory>,
    cached: Mutex<Option<(u64, Arc<dyn LlmProvider>)>>,
}

impl CompletionEngine {
    pub fn new(settings: Arc<SettingsStore>, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            settings,
            factory,
            cached: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    async fn handle(&self) -> (EngineSettings, Arc<dyn LlmProvider>) {
        let (settings, version) = self.settings.snapshot().await;
        let mut cached = self.cached.lock().await;
        if let Some((v, provider)) = cached.as_ref()
            && *v == version
        {
            return (settings, provider.clone());
        }
        let provider = self.factory.build(&settings);
        info!(
            "Built {} handle for {} at {} (settings v{})",
            provider.name(),
            settings.model,
            settings.endpoint,
            version
        );
        *cached = Some((version, provider.clone()));
        (settings, provider)
    }

    /// Tool-bound when `tools` is non-empty, plain otherwise. Mode is
    /// decided per call and never remembered.
    pub async fn complete(
        &self,
        system: &str,
        transcript: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message> {
        let (settings, provider) = self.handle().await;
        let temperature = if tools.is_empty() {
            settings.temperature
        } else {
            TOOL_TEMPERATURE
        };
        let request = ChatRequest {
            system: system.to_string(),
            messages: transcript.to_vec(),
            tools: tools.to_vec(),
            temperature,
        };
        provider.chat(&request).await
    }

    pub async fn health(&self) -> EngineHealth {
        let (_, provider) = self.handle().await;
        provider.health().await
    }
}
