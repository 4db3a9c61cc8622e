use anyhow::{Result, bail};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::core::dispatch::DispatchGraph;
use crate::core::gate;
use crate::core::llm::Message;
use crate::core::memory::{Role, SessionStore};
use crate::core::stream::{Emitter, StreamEvent, TOKEN_DELAY, spawn_stream};

pub const NEAR_MISS_NOTICE: &str = "No connector matched; answering without tools. \
Prefix with [texts], [emails] or [files] to use one.";

/// Client request for one turn. `utterance` is accepted as an alias of
/// `message`.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    #[serde(default, alias = "chat_id")]
    pub session_id: Option<String>,
    #[serde(alias = "utterance")]
    pub message: String,
}

/// Runs turns end to end: gate, session bookkeeping, dispatch, and token
/// streaming. Each turn owns its classification and transcript.
pub struct Conversation {
    sessions: Arc<SessionStore>,
    graph: Arc<DispatchGraph>,
    token_delay: Duration,
}

impl Conversation {
    pub fn new(sessions: Arc<SessionStore>, graph: Arc<DispatchGraph>) -> Self {
        Self {
            sessions,
            graph,
            token_delay: TOKEN_DELAY,
        }
    }

    #[cfg(test)]
    pub fn without_delay(mut self) -> Self {
        self.token_delay = Duration::ZERO;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn stream(self: &Arc<Self>, request: TurnRequest) -> ReceiverStream<StreamEvent> {
        let this = self.clone();
        spawn_stream(move |events| async move { this.run(request, events).await })
    }

    async fn run(&self, request: TurnRequest, events: Emitter) -> Result<String> {
        let classification = gate::classify(&request.message);
        if classification.clean_query.is_empty() {
            bail!("Message is empty");
        }

        let session_id = match request.session_id.filter(|s| !s.trim().is_empty()) {
            Some(id) => {
                if !self.sessions.exists(&id).await? {
                    bail!("Session not found: {}", id);
                }
                id
            }
            None => self.sessions.create_session(None).await?,
        };

        info!(
            "Turn for session {}: activation=[{}] tools_needed={}",
            session_id,
            classification.activation.as_tags(),
            classification.tools_needed
        );
        if classification.near_miss {
            info!("No connector matched an action-like request; answering in plain mode");
            events.status(NEAR_MISS_NOTICE).await;
        }

        let mut transcript: Vec<Message> = self
            .sessions
            .history(&session_id)
            .await?
            .into_iter()
            .map(|m| match m.role {
                Role::Human => Message::Human(m.content),
                Role::Assistant => Message::assistant(m.content),
            })
            .collect();
        transcript.push(Message::Human(classification.clean_query.clone()));
        self.sessions
            .append(&session_id, Role::Human, &classification.clean_query)
            .await?;

        let outcome = self.graph.run(transcript, &classification, &events).await?;

        if !outcome.reply.is_empty() {
            events.tokens(&outcome.reply, self.token_delay).await;
            self.sessions
                .append(&session_id, Role::Assistant, &outcome.reply)
                .await?;
            self.sessions
                .auto_title(&session_id, &classification.clean_query)
                .await?;
        }

        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ContextAssembler;
    use crate::core::llm::CompletionEngine;
    use crate::core::settings::{EngineSettings, SettingsStore};
    use crate::core::testing::{
        FakeConnectors, ScriptedFactory, ScriptedProvider, assistant_calling, tool_call,
    };
    use crate::tools::ToolExecutor;
    use tokio_stream::StreamExt;

    fn conversation(provider: Arc<ScriptedProvider>) -> Arc<Conversation> {
        conversation_with(provider, &FakeConnectors::default())
    }

    fn conversation_with(
        provider: Arc<ScriptedProvider>,
        fakes: &FakeConnectors,
    ) -> Arc<Conversation> {
        let engine = Arc::new(CompletionEngine::new(
            Arc::new(SettingsStore::in_memory(EngineSettings::default())),
            Arc::new(ScriptedFactory::new(provider)),
        ));
        let graph = Arc::new(DispatchGraph::new(
            engine,
            ToolExecutor::new(fakes.bundle()),
            ContextAssembler::new(fakes.bundle()),
            None,
        ));
        let sessions = Arc::new(SessionStore::in_memory().unwrap());
        Arc::new(Conversation::new(sessions, graph).without_delay())
    }

    fn request(session_id: Option<&str>, message: &str) -> TurnRequest {
        TurnRequest {
            session_id: session_id.map(str::to_string),
            message: message.to_string(),
        }
    }

    fn terminal_count(events: &[StreamEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test]
    async fn new_session_is_created_and_echoed_in_done() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("Hi there")]));
        let conv = conversation(provider);

        let events: Vec<_> = conv.stream(request(None, "hello")).collect().await;

        let Some(StreamEvent::Done(id)) = events.last() else {
            panic!("expected done, got {events:?}");
        };
        assert_eq!(terminal_count(&events), 1);
        let tokens: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, "Hi there");

        let history = conv.sessions().history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        let sessions = conv.sessions().list_sessions().await.unwrap();
        assert_eq!(sessions[0].title, "hello");
    }

    #[tokio::test]
    async fn stored_history_uses_clean_query() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("Found it.")]));
        let conv = conversation(provider.clone());

        let events: Vec<_> = conv
            .stream(request(None, "[files] refund policy"))
            .collect()
            .await;
        let Some(StreamEvent::Done(id)) = events.last() else {
            panic!("expected done");
        };

        let history = conv.sessions().history(id).await.unwrap();
        assert_eq!(history[0].content, "refund policy");
        let req = provider.requests().await.remove(0);
        assert!(
            req.messages
                .iter()
                .all(|m| !matches!(m, Message::Human(t) if t.contains("[files]")))
        );
    }

    #[tokio::test]
    async fn inference_failure_yields_single_error_without_tokens_after() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![Err(
            "Cannot reach inference engine".into(),
        )]));
        let conv = conversation(provider);

        let events: Vec<_> = conv.stream(request(None, "hello")).collect().await;

        assert_eq!(terminal_count(&events), 1);
        assert!(matches!(events.last(), Some(StreamEvent::Error(e)) if e.contains("Cannot reach")));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Token(_))));
    }

    #[tokio::test]
    async fn history_is_replayed_into_next_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant("first"),
            Message::assistant("second"),
        ]));
        let conv = conversation(provider.clone());

        let events: Vec<_> = conv.stream(request(None, "one")).collect().await;
        let Some(StreamEvent::Done(id)) = events.last().cloned() else {
            panic!("expected done");
        };
        let _: Vec<_> = conv.stream(request(Some(&id), "two")).collect().await;

        let second = provider.requests().await.pop().unwrap();
        assert_eq!(
            second.messages,
            vec![
                Message::Human("one".into()),
                Message::assistant("first"),
                Message::Human("two".into()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let conv = conversation(Arc::new(ScriptedProvider::new(vec![])));
        let events: Vec<_> = conv
            .stream(request(Some("nope"), "hello"))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(e) if e.contains("Session not found")));
    }

    #[tokio::test]
    async fn near_miss_emits_one_status_notice() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("Sure.")]));
        let conv = conversation(provider);

        let events: Vec<_> = conv
            .stream(request(None, "please email Dana the notes"))
            .collect()
            .await;

        let notices = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Status(s) if s == NEAR_MISS_NOTICE))
            .count();
        assert_eq!(notices, 1);
    }

    #[tokio::test]
    async fn disconnect_before_tools_sends_nothing() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            assistant_calling(vec![tool_call(
                "c1",
                crate::tools::SEND_MESSAGE,
                serde_json::json!({"recipient": "+1555", "message": "yo"}),
            )]),
            Message::assistant("Sent."),
        ]));
        let fakes = FakeConnectors::default();
        let conv = conversation_with(provider, &fakes);

        drop(conv.stream(request(None, "send yo to +1555")));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(fakes.sent().await.is_empty());
    }

    #[test]
    fn request_accepts_utterance_alias() {
        let r: TurnRequest = serde_json::from_str(r#"{"utterance":"hi"}"#).unwrap();
        assert_eq!(r.message, "hi");
        assert!(r.session_id.is_none());
    }
}
