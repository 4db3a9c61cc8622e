//! Test doubles for the inference engine and the connectors.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::connectors::{
    ConnectorError, ConnectorResult, Connectors, DocumentHit, DocumentIndex, DocumentInfo, Email,
    MailSource, MessageSource, TextMessage,
};
use crate::core::llm::{
    ChatRequest, EngineHealth, LlmProvider, Message, ProviderFactory, ToolCall,
};
use crate::core::settings::EngineSettings;

/// Replays queued responses in order and records every request.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Message, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Message>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<Message, String>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Message> {
        self.requests.lock().await.push(request.clone());
        match self.script.lock().await.pop_front() {
            Some(Ok(m)) => Ok(m),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("scripted provider has no more responses")),
        }
    }

    async fn health(&self) -> EngineHealth {
        EngineHealth {
            running: true,
            model_available: true,
            model: "scripted".into(),
            available_models: vec!["scripted".into()],
        }
    }
}

pub struct ScriptedFactory {
    provider: Arc<ScriptedProvider>,
    builds: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(provider: Arc<ScriptedProvider>) -> Self {
        Self {
            provider,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for ScriptedFactory {
    fn build(&self, _settings: &EngineSettings) -> Arc<dyn LlmProvider> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.provider.clone()
    }
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

pub fn assistant_calling(calls: Vec<ToolCall>) -> Message {
    Message::Assistant {
        content: String::new(),
        tool_calls: calls,
    }
}

// ── Connectors ──

fn failure(slot: &Option<String>) -> ConnectorResult<()> {
    match slot {
        Some(msg) => Err(ConnectorError::Permission(msg.clone())),
        None => Ok(()),
    }
}

#[derive(Default)]
pub struct FakeMessages {
    fail: Mutex<Option<String>>,
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageSource for FakeMessages {
    async fn read_messages(
        &self,
        _filter: Option<&str>,
        limit: usize,
    ) -> ConnectorResult<Vec<TextMessage>> {
        failure(&*self.fail.lock().await)?;
        let all = vec![
            TextMessage {
                sender: "+15550001".into(),
                text: "are we still on for dinner?".into(),
                timestamp: 1_700_000_200,
                chat_label: "Alex".into(),
                is_self: false,
            },
            TextMessage {
                sender: "Me".into(),
                text: "running late".into(),
                timestamp: 1_700_000_100,
                chat_label: "Alex".into(),
                is_self: true,
            },
        ];
        Ok(all.into_iter().take(limit).collect())
    }

    async fn send_message(&self, recipient: &str, text: &str) -> ConnectorResult<String> {
        failure(&*self.fail.lock().await)?;
        self.sent
            .lock()
            .await
            .push((recipient.to_string(), text.to_string()));
        Ok(format!("Message sent to {recipient}"))
    }

    async fn available(&self) -> bool {
        self.fail.lock().await.is_none()
    }
}

#[derive(Default)]
pub struct FakeMail {
    fail: Mutex<Option<String>>,
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl MailSource for FakeMail {
    async fn read_emails(&self, _mailbox: &str, limit: usize) -> ConnectorResult<Vec<Email>> {
        failure(&*self.fail.lock().await)?;
        let all = vec![Email {
            id: "m1".into(),
            sender: "ap@acme.com".into(),
            subject: "Invoice 42".into(),
            date: "Monday".into(),
            body: "Please pay by Friday.".into(),
        }];
        Ok(all.into_iter().take(limit).collect())
    }

    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> ConnectorResult<String> {
        failure(&*self.fail.lock().await)?;
        self.sent
            .lock()
            .await
            .push((recipient.into(), subject.into(), body.into()));
        Ok(format!("Email sent to {recipient}"))
    }

    async fn available(&self) -> bool {
        self.fail.lock().await.is_none()
    }
}

#[derive(Default)]
pub struct FakeDocuments {
    fail: Mutex<Option<String>>,
    docs: Mutex<Vec<DocumentInfo>>,
}

#[async_trait]
impl DocumentIndex for FakeDocuments {
    async fn search(&self, _query: &str, k: usize) -> ConnectorResult<Vec<DocumentHit>> {
        failure(&*self.fail.lock().await)?;
        let hits = vec![DocumentHit {
            content: "Refunds are accepted within 30 days.".into(),
            label: "handbook.pdf".into(),
            score: 1.0,
        }];
        Ok(hits.into_iter().take(k).collect())
    }

    async fn index_document(&self, label: &str, _text: &str) -> ConnectorResult<DocumentInfo> {
        failure(&*self.fail.lock().await)?;
        let info = DocumentInfo {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            chunks: 1,
            created_at: "now".into(),
        };
        self.docs.lock().await.push(info.clone());
        Ok(info)
    }

    async fn list_documents(&self) -> ConnectorResult<Vec<DocumentInfo>> {
        failure(&*self.fail.lock().await)?;
        Ok(self.docs.lock().await.clone())
    }

    async fn delete_document(&self, id: &str) -> ConnectorResult<bool> {
        let mut docs = self.docs.lock().await;
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() != before)
    }
}

#[derive(Default, Clone)]
pub struct FakeConnectors {
    pub messages: Arc<FakeMessages>,
    pub mail: Arc<FakeMail>,
    pub documents: Arc<FakeDocuments>,
}

impl FakeConnectors {
    pub fn bundle(&self) -> Connectors {
        Connectors {
            messages: self.messages.clone(),
            mail: self.mail.clone(),
            documents: self.documents.clone(),
        }
    }

    pub async fn fail_messages(&self, msg: &str) {
        *self.messages.fail.lock().await = Some(msg.to_string());
    }

    pub async fn fail_mail(&self, msg: &str) {
        *self.mail.fail.lock().await = Some(msg.to_string());
    }

    pub async fn fail_documents(&self, msg: &str) {
        *self.documents.fail.lock().await = Some(msg.to_string());
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.messages.sent.lock().await.clone()
    }

    pub async fn sent_emails(&self) -> Vec<(String, String, String)> {
        self.mail.sent.lock().await.clone()
    }
}
