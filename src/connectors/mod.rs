//! Narrow contracts for the external capability providers a turn can use,
//! plus the concrete local adapters.

pub mod documents;
pub mod mail;
pub mod messages;
mod osascript;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("{0} is not available on this system")]
    Unavailable(String),
    #[error("{0}")]
    Permission(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    InvalidArgument(String),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMessage {
    pub sender: String,
    pub text: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub chat_label: String,
    pub is_self: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub date: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentHit {
    pub content: String,
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub label: String,
    pub chunks: usize,
    pub created_at: String,
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Most recent first.
    async fn read_messages(
        &self,
        filter: Option<&str>,
        limit: usize,
    ) -> ConnectorResult<Vec<TextMessage>>;

    async fn send_message(&self, recipient: &str, text: &str) -> ConnectorResult<String>;

    async fn available(&self) -> bool;
}

#[async_trait]
pub trait MailSource: Send + Sync {
    /// Most recent first.
    async fn read_emails(&self, mailbox: &str, limit: usize) -> ConnectorResult<Vec<Email>>;

    async fn send_email(&self, recipient: &str, subject: &str, body: &str)
    -> ConnectorResult<String>;

    async fn available(&self) -> bool;
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> ConnectorResult<Vec<DocumentHit>>;

    async fn index_document(&self, label: &str, text: &str) -> ConnectorResult<DocumentInfo>;

    async fn list_documents(&self) -> ConnectorResult<Vec<DocumentInfo>>;

    async fn delete_document(&self, id: &str) -> ConnectorResult<bool>;
}

/// Connector handles shared read-only by every turn.
#[derive(Clone)]
pub struct Connectors {
    pub messages: Arc<dyn MessageSource>,
    pub mail: Arc<dyn MailSource>,
    pub documents: Arc<dyn DocumentIndex>,
}
