use tracing::{info, warn};

use crate::connectors::{ConnectorResult, Connectors, DocumentHit};
use crate::core::gate::{ActivationSet, Connector};
use crate::tools::{render_emails, render_messages};

const CONTEXT_MESSAGES: usize = 20;
const CONTEXT_EMAILS: usize = 10;
const CONTEXT_DOCUMENTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub connector: Connector,
    pub text: String,
    /// False when the block is a fallback note for a failed source.
    pub available: bool,
}

impl ContextBlock {
    fn heading(connector: Connector) -> &'static str {
        match connector {
            Connector::Texts => "Recent messages (newest first)",
            Connector::Emails => "Recent emails (newest first)",
            Connector::Files => "Relevant document excerpts",
        }
    }

    pub fn render(&self) -> String {
        format!("### {}\n{}", Self::heading(self.connector), self.text)
    }
}

fn render_hits(hits: &[DocumentHit]) -> String {
    if hits.is_empty() {
        return "No matching documents.".to_string();
    }
    hits.iter()
        .map(|h| format!("[{}] (score {:.2}) {}", h.label, h.score, h.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fetches one context block per active connector. Sources are queried
/// one after another in activation order. A failing source turns into a
/// readable note and never aborts the others.
pub struct ContextAssembler {
    connectors: Connectors,
}

impl ContextAssembler {
    pub fn new(connectors: Connectors) -> Self {
        Self { connectors }
    }

    pub async fn assemble(&self, activation: &ActivationSet, query: &str) -> Vec<ContextBlock> {
        let mut blocks = Vec::new();
        for connector in activation.iter() {
            let fetched: ConnectorResult<String> = match connector {
                Connector::Texts => self
                    .connectors
                    .messages
                    .read_messages(None, CONTEXT_MESSAGES)
                    .await
                    .map(|m| render_messages(&m)),
                Connector::Emails => self
                    .connectors
                    .mail
                    .read_emails("Inbox", CONTEXT_EMAILS)
                    .await
                    .map(|e| render_emails(&e)),
                Connector::Files => self
                    .connectors
                    .documents
                    .search(query, CONTEXT_DOCUMENTS)
                    .await
                    .map(|h| render_hits(&h)),
            };

            let block = match fetched {
                Ok(text) => {
                    info!("Context from {} ({} chars)", connector, text.len());
                    ContextBlock {
                        connector,
                        text,
                        available: true,
                    }
                }
                Err(e) => {
                    warn!("Context source {} unavailable: {}", connector, e);
                    ContextBlock {
                        connector,
                        text: format!("(This source is unavailable right now: {e})"),
                        available: false,
                    }
                }
            };
            blocks.push(block);
        }
        blocks
    }
}
