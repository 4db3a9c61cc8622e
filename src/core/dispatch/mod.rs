//! One conversational turn as a small state machine:
//! `Route` then either `End`, or `Tools` then `Draft` then `End`.
//! There is at most one Route to Tools round trip per turn.

use anyhow::{Result, bail};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::info;

use crate::core::context::{ContextAssembler, ContextBlock};
use crate::core::drafter;
use crate::core::gate::Classification;
use crate::core::llm::{CompletionEngine, Message, ToolResult, ToolSpec};
use crate::core::stream::Emitter;
use crate::tools::{self, ToolExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Route,
    Tools,
    Draft,
    End,
}

impl GraphState {
    pub fn as_str(self) -> &'static str {
        match self {
            GraphState::Route => "route",
            GraphState::Tools => "tools",
            GraphState::Draft => "draft",
            GraphState::End => "end",
        }
    }
}

pub fn can_transition(from: GraphState, to: GraphState) -> bool {
    match from {
        GraphState::Route => matches!(to, GraphState::Tools | GraphState::End),
        GraphState::Tools => matches!(to, GraphState::Draft),
        GraphState::Draft => matches!(to, GraphState::End),
        GraphState::End => false,
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    /// Full transcript including the final assistant message.
    pub transcript: Vec<Message>,
    /// States visited, starting with `Route`.
    pub path: Vec<GraphState>,
}

/// Builds the system directive for the Route step.
pub fn route_directive(
    now: DateTime<Local>,
    context: &[ContextBlock],
    tools: &[ToolSpec],
    self_handle: Option<&str>,
) -> String {
    let today = now.format("%A, %B %d, %Y at %I:%M %p");
    let mut out = format!(
        "You are Courier, a private assistant running locally on the user's Mac. Today is {today}.\n"
    );

    if !context.is_empty() {
        out.push_str(
            "\nThe context below was retrieved for this request. Use it to answer. \
             If a source says it is unavailable, tell the user rather than guessing.\n\n",
        );
        for block in context {
            out.push_str(&block.render());
            out.push_str("\n\n");
        }
    }

    if tools.is_empty() {
        out.push_str(
            "\nAnswer the user's question directly and concisely. Do not pretend to use any tools.",
        );
        return out;
    }

    out.push_str("\nYou have been given these tools:\n");
    for t in tools {
        out.push_str(&format!("- {}: {}\n", t.name, t.description));
    }
    out.push_str(
        "\nTool contract:\n\
         - Call at most ONE tool.\n\
         - Never call a send tool unless the user gave BOTH a specific recipient AND the exact content to send. \
         If either is missing, ask for it instead of calling the tool.\n\
         - If no tool is needed, just answer.",
    );
    if let Some(handle) = self_handle.filter(|h| !h.is_empty()) {
        out.push_str(&format!(
            "\n- The user's own handle is {handle}; use it when they ask to message themselves."
        ));
    }
    out
}

fn advance(state: &mut GraphState, path: &mut Vec<GraphState>, to: GraphState) -> Result<()> {
    if !can_transition(*state, to) {
        bail!(
            "invalid dispatch transition {} -> {}",
            state.as_str(),
            to.as_str()
        );
    }
    info!("Dispatch: {} -> {}", state.as_str(), to.as_str());
    *state = to;
    path.push(to);
    Ok(())
}

pub struct DispatchGraph {
    engine: Arc<CompletionEngine>,
    executor: ToolExecutor,
    assembler: ContextAssembler,
    self_handle: Option<String>,
}

impl DispatchGraph {
    pub fn new(
        engine: Arc<CompletionEngine>,
        executor: ToolExecutor,
        assembler: ContextAssembler,
        self_handle: Option<String>,
    ) -> Self {
        Self {
            engine,
            executor,
            assembler,
            self_handle,
        }
    }

    /// Runs one turn over `transcript`, which must already end with the
    /// user's (tag-free) message. Inference failures propagate; connector
    /// and tool failures are folded into the transcript.
    pub async fn run(
        &self,
        mut transcript: Vec<Message>,
        classification: &Classification,
        events: &Emitter,
    ) -> Result<TurnOutcome> {
        let mut state = GraphState::Route;
        let mut path = vec![state];

        // Route
        let bound = tools::bind_tools(classification);
        if !classification.activation.is_empty() {
            events.status("Gathering context…").await;
        }
        let context = self
            .assembler
            .assemble(&classification.activation, &classification.clean_query)
            .await;
        let directive = route_directive(
            Local::now(),
            &context,
            &bound,
            self.self_handle.as_deref(),
        );
        let routed = self.engine.complete(&directive, &transcript, &bound).await?;

        let calls = routed.tool_calls().to_vec();
        if calls.is_empty() {
            advance(&mut state, &mut path, GraphState::End)?;
            let reply = match &routed {
                Message::Assistant { content, .. } => content.clone(),
                _ => String::new(),
            };
            transcript.push(routed);
            return Ok(TurnOutcome {
                reply,
                transcript,
                path,
            });
        }

        // Tools
        advance(&mut state, &mut path, GraphState::Tools)?;
        let mut connected = true;
        for call in &calls {
            connected &= events.status(format!("Using tool: {}…", call.name)).await;
        }
        // No tool runs for a client that has gone away.
        if !connected {
            bail!("Client disconnected before tools ran");
        }
        transcript.push(routed);
        for call in &calls {
            let result = if bound.iter().any(|t| t.name == call.name) {
                self.executor.execute(call).await
            } else {
                ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: format!(
                        "Error: tool '{}' is not available for this request.",
                        call.name
                    ),
                    is_error: true,
                }
            };
            transcript.push(Message::ToolResult(result));
        }
        events.status("Processing results…").await;

        // Draft
        advance(&mut state, &mut path, GraphState::Draft)?;
        let reply = drafter::draft(&self.engine, &transcript).await?;
        transcript.push(Message::assistant(reply.clone()));
        advance(&mut state, &mut path, GraphState::End)?;

        Ok(TurnOutcome {
            reply,
            transcript,
            path,
        })
    }
}

#[cfg(test)]
mod tests;
