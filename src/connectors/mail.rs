use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::osascript;
use super::{ConnectorError, ConnectorResult, Email, MailSource};

const BLOCK_MARKER: &str = "---EMAIL---";
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);
const AUTOMATION_HINT: &str = "Grant Automation access to the terminal in System Settings.";

/// Reads and sends mail through the Mail app.
pub struct MailConnector {
    timeout: Duration,
}

impl MailConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn read_script(mailbox: &str, limit: usize) -> String {
    let source = if mailbox.trim().is_empty() || mailbox.eq_ignore_ascii_case("inbox") {
        "inbox".to_string()
    } else {
        format!(
            "mailbox \"{}\" of account 1",
            osascript::escape(mailbox.trim())
        )
    };
    format!(
        r#"tell application "Mail"
    set output to ""
    try
        set allMsgs to messages of {source}
        set msgCount to count of allMsgs
        if msgCount > {limit} then set msgCount to {limit}
        set msgs to items 1 thru msgCount of allMsgs
        repeat with msg in msgs
            set msgBody to (content of msg) as string
            if (length of msgBody) > 500 then
                set msgBody to (text 1 thru 500 of msgBody) & "..."
            end if
            set output to output & "{BLOCK_MARKER}" & return
            set output to output & "id:" & (message id of msg as string) & return
            set output to output & "subject:" & (subject of msg as string) & return
            set output to output & "sender:" & (sender of msg as string) & return
            set output to output & "date:" & (date received of msg as string) & return
            set output to output & "body:" & msgBody & return
        end repeat
    on error errMsg
        set output to "ERROR:" & errMsg
    end try
    return output
end tell"#
    )
}

/// Parses `---EMAIL---` delimited blocks of `key:value` lines. Blocks
/// without a subject are dropped.
pub(crate) fn parse_blocks(raw: &str) -> ConnectorResult<Vec<Email>> {
    if let Some(err) = raw.trim_start().strip_prefix("ERROR:") {
        return Err(ConnectorError::Failed(err.trim().to_string()));
    }

    let mut emails = Vec::new();
    for block in raw.split(BLOCK_MARKER) {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut email = Email {
            id: String::new(),
            sender: String::new(),
            subject: String::new(),
            date: String::new(),
            body: String::new(),
        };
        // AppleScript's `return` is a bare CR.
        for line in block.split(['\n', '\r']) {
            if let Some(v) = line.strip_prefix("id:") {
                email.id = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("subject:") {
                email.subject = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("sender:") {
                email.sender = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("date:") {
                email.date = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("body:") {
                email.body = v.trim().to_string();
            }
        }
        if !email.subject.is_empty() {
            emails.push(email);
        }
    }
    Ok(emails)
}

#[async_trait]
impl MailSource for MailConnector {
    async fn read_emails(&self, mailbox: &str, limit: usize) -> ConnectorResult<Vec<Email>> {
        let limit = limit.clamp(1, 50);
        let raw = osascript::run(&read_script(mailbox, limit), self.timeout)
            .await
            .map_err(|e| match e {
                ConnectorError::Failed(msg) => {
                    ConnectorError::Permission(format!("Mail.app error: {msg}. {AUTOMATION_HINT}"))
                }
                other => other,
            })?;
        parse_blocks(&raw)
    }

    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> ConnectorResult<String> {
        if recipient.trim().is_empty() || body.trim().is_empty() {
            return Err(ConnectorError::InvalidArgument(
                "recipient and message are required".to_string(),
            ));
        }

        let script = format!(
            r#"tell application "Mail"
    set newMessage to make new outgoing message with properties {{subject:"{}", content:"{}", visible:false}}
    tell newMessage
        make new to recipient at end of to recipients with properties {{address:"{}"}}
    end tell
    send newMessage
end tell"#,
            osascript::escape(subject),
            osascript::escape(body),
            osascript::escape(recipient.trim())
        );

        match osascript::run(&script, self.timeout).await {
            Ok(_) => {
                info!("Email sent to {}", recipient);
                Ok(format!("Email sent to {}", recipient.trim()))
            }
            Err(ConnectorError::Timeout(_)) => {
                Err(ConnectorError::Timeout("Send timed out".to_string()))
            }
            Err(ConnectorError::Failed(e)) => {
                warn!("Email send failed: {}", e);
                Err(ConnectorError::Failed(format!("Failed to send email: {e}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn available(&self) -> bool {
        let script = r#"tell application "Mail"
    return (count of accounts) as string
end tell"#;
        osascript::run(script, AVAILABILITY_TIMEOUT).await.is_ok()
    }
}
