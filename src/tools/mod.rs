//! Tools the model may call, and the executor that runs them against the
//! connectors.

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::connectors::{ConnectorError, Connectors, Email, TextMessage};
use crate::core::gate::{Classification, Connector};
use crate::core::llm::{ToolCall, ToolResult, ToolSpec};

pub const READ_MESSAGES: &str = "read_recent_messages";
pub const SEND_MESSAGE: &str = "send_message";
pub const READ_EMAILS: &str = "read_recent_emails";
pub const SEND_EMAIL: &str = "send_email";

const DEFAULT_MESSAGE_LIMIT: usize = 10;
const DEFAULT_EMAIL_LIMIT: usize = 5;
const MISSING_SEND_ARGS: &str = "Error: recipient and message are required.";

pub fn read_messages_spec() -> ToolSpec {
    ToolSpec {
        name: READ_MESSAGES,
        description: "Read recent iMessages, newest first.",
        parameters: json!({
            "type": "object",
            "properties": {
                "contact": {"type": "string", "description": "Name or phone number to filter by. Empty for all contacts."},
                "limit": {"type": "integer", "description": "How many messages (default 10, max 50)."}
            }
        }),
    }
}

pub fn send_message_spec() -> ToolSpec {
    ToolSpec {
        name: SEND_MESSAGE,
        description: "Send an iMessage. Only call with a specific recipient AND specific message text.",
        parameters: json!({
            "type": "object",
            "properties": {
                "recipient": {"type": "string", "description": "Phone number (+1...) or Apple ID email."},
                "message": {"type": "string", "description": "The exact text to send."}
            },
            "required": ["recipient", "message"]
        }),
    }
}

pub fn read_emails_spec() -> ToolSpec {
    ToolSpec {
        name: READ_EMAILS,
        description: "Read recent emails from Mail, newest first.",
        parameters: json!({
            "type": "object",
            "properties": {
                "mailbox": {"type": "string", "description": "Mailbox name (default Inbox)."},
                "limit": {"type": "integer", "description": "How many emails (default 5, max 50)."}
            }
        }),
    }
}

pub fn send_email_spec() -> ToolSpec {
    ToolSpec {
        name: SEND_EMAIL,
        description: "Send an email. Only call with a specific recipient address AND body text.",
        parameters: json!({
            "type": "object",
            "properties": {
                "recipient": {"type": "string", "description": "Recipient email address."},
                "subject": {"type": "string", "description": "Subject line."},
                "body": {"type": "string", "description": "The exact email body."}
            },
            "required": ["recipient", "body"]
        }),
    }
}

/// The minimal tool subset for a turn. Tags win over the pattern gate;
/// `[files]` only ever contributes context.
pub fn bind_tools(classification: &Classification) -> Vec<ToolSpec> {
    if classification.activation.is_empty() {
        if classification.tools_needed {
            return vec![read_messages_spec(), send_message_spec()];
        }
        return Vec::new();
    }

    classification
        .activation
        .iter()
        .filter_map(|c| match c {
            Connector::Texts => Some(send_message_spec()),
            Connector::Emails => Some(send_email_spec()),
            Connector::Files => None,
        })
        .collect()
}

fn str_arg<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn limit_arg(args: &Value, default: usize) -> usize {
    match args.get("limit") {
        Some(Value::Number(n)) => n.as_u64().map(|v| v as usize).unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub fn render_messages(messages: &[TextMessage]) -> String {
    if messages.is_empty() {
        return "No messages found.".to_string();
    }
    messages
        .iter()
        .map(|m| {
            let me = if m.is_self { "(me)" } else { "" };
            format!("[{}] {}{}: {}", m.chat_label, m.sender, me, m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_emails(emails: &[Email]) -> String {
    if emails.is_empty() {
        return "No emails found.".to_string();
    }
    emails
        .iter()
        .map(|e| format!("- {} | {} | {}: {}", e.date, e.sender, e.subject, e.body))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct ToolExecutor {
    connectors: Connectors,
}

impl ToolExecutor {
    pub fn new(connectors: Connectors) -> Self {
        Self { connectors }
    }

    /// Runs every call in order. Exactly one result per call, carrying the
    /// call's correlation id.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        info!("Executing tool {} ({})", call.name, call.id);
        let outcome = self.run(&call.name, &call.arguments).await;
        let (content, is_error) = match outcome {
            Ok(text) => (text, false),
            Err(text) => {
                warn!("Tool {} failed: {}", call.name, text);
                (text, true)
            }
        };
        ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            is_error,
        }
    }

    async fn run(&self, name: &str, args: &Value) -> Result<String, String> {
        let failed = |e: ConnectorError| format!("Error: {e}");
        match name {
            READ_MESSAGES => {
                let contact = str_arg(args, &["contact", "contact_name"]);
                let limit = limit_arg(args, DEFAULT_MESSAGE_LIMIT);
                self.connectors
                    .messages
                    .read_messages(contact, limit)
                    .await
                    .map(|m| render_messages(&m))
                    .map_err(failed)
            }
            SEND_MESSAGE => {
                let (Some(recipient), Some(text)) = (
                    str_arg(args, &["recipient"]),
                    str_arg(args, &["message", "text"]),
                ) else {
                    return Err(MISSING_SEND_ARGS.to_string());
                };
                self.connectors
                    .messages
                    .send_message(recipient, text)
                    .await
                    .map_err(failed)
            }
            READ_EMAILS => {
                let mailbox = str_arg(args, &["mailbox"]).unwrap_or("Inbox");
                let limit = limit_arg(args, DEFAULT_EMAIL_LIMIT);
                self.connectors
                    .mail
                    .read_emails(mailbox, limit)
                    .await
                    .map(|e| render_emails(&e))
                    .map_err(failed)
            }
            SEND_EMAIL => {
                let (Some(recipient), Some(body)) = (
                    str_arg(args, &["recipient", "to"]),
                    str_arg(args, &["body", "message"]),
                ) else {
                    return Err(MISSING_SEND_ARGS.to_string());
                };
                let subject = str_arg(args, &["subject"]).unwrap_or("");
                self.connectors
                    .mail
                    .send_email(recipient, subject, body)
                    .await
                    .map_err(failed)
            }
            other => Err(format!("Error: unknown tool '{other}'")),
        }
    }
}
