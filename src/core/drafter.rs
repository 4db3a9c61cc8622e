use anyhow::Result;

use crate::core::llm::{CompletionEngine, Message};

pub const DRAFTER_SYSTEM: &str = "You are Courier. One or more tools were just called and you have their results. Summarize them for the user.

Rules:
- Read results (messages, emails): present them clearly with sender and content, most recent first.
- Send results: confirm ONLY if the tool result explicitly says it was sent. Say what was sent and to whom.
- Tool error: explain what went wrong and how the user can fix it. Relay the error faithfully.
- NEVER claim a message or email was sent unless the tool result confirms it.
- NEVER invent message content, senders or actions that are not in the tool results.
- Be concise.";

/// Produces the final assistant reply from a transcript that already ends
/// with the tool results. No tools are bound at this step.
pub async fn draft(engine: &CompletionEngine, transcript: &[Message]) -> Result<String> {
    let reply = engine.complete(DRAFTER_SYSTEM, transcript, &[]).await?;
    Ok(match reply {
        Message::Assistant { content, .. } => content,
        _ => String::new(),
    })
}
