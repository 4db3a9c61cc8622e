//! Turns one producer into an ordered, typed event stream.
//!
//! Producers only ever see an [`Emitter`], which can push non-terminal
//! events. The bridge owns the terminal event: once the producer returns
//! (or fails, or panics) it takes the sender away from the emitter and
//! sends exactly one `done` or `error`. Nothing can follow it. A consumer
//! that goes away cancels the producer.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

const EVENT_BUFFER: usize = 32;

/// Inter-token pacing for incremental rendering.
pub const TOKEN_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum StreamEvent {
    Status(String),
    Token(String),
    Log(String),
    Error(String),
    Done(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_) | StreamEvent::Done(_))
    }

    pub fn to_json(&self) -> String {
        // Serializing a two-string enum cannot fail; keep a well-formed
        // fallback anyway so a transport never gets an empty frame.
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","content":"event encoding failed"}"#.into())
    }
}

type SharedSender = Arc<Mutex<Option<mpsc::Sender<StreamEvent>>>>;

/// Producer-side handle. Not `Clone`: one producer, one ordered sequence.
pub struct Emitter {
    tx: SharedSender,
}

impl Emitter {
    async fn push(&self, event: StreamEvent) -> bool {
        let guard = self.tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Returns false once the consumer has gone away.
    pub async fn status(&self, text: impl Into<String>) -> bool {
        self.push(StreamEvent::Status(text.into())).await
    }

    pub async fn token(&self, text: impl Into<String>) -> bool {
        self.push(StreamEvent::Token(text.into())).await
    }

    pub async fn log(&self, line: impl Into<String>) -> bool {
        self.push(StreamEvent::Log(line.into())).await
    }

    /// Emits `text` as word-sized token chunks in reading order. Stops
    /// early if the consumer disconnects.
    pub async fn tokens(&self, text: &str, delay: Duration) -> bool {
        for chunk in word_chunks(text) {
            if !self.token(chunk).await {
                return false;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        true
    }
}

/// Splits on single spaces, keeping the separator on every chunk but the
/// last, so concatenating the chunks reproduces the input exactly.
pub fn word_chunks(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let words: Vec<&str> = text.split(' ').collect();
    let last = words.len() - 1;
    words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            if i < last {
                format!("{w} ")
            } else {
                (*w).to_string()
            }
        })
        .collect()
}

/// Runs `producer` on its own task and returns the event stream.
///
/// `Ok(content)` becomes `done(content)`, `Err(e)` becomes `error(e)`, and
/// a panic inside the producer becomes a generic `error`. Events already
/// emitted before the failure stay in the stream. Dropping the stream
/// aborts the producer at its next suspension point.
pub fn spawn_stream<F, Fut>(producer: F) -> ReceiverStream<StreamEvent>
where
    F: FnOnce(Emitter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let watch = tx.clone();
    let shared: SharedSender = Arc::new(Mutex::new(Some(tx)));
    let emitter = Emitter { tx: shared.clone() };

    tokio::spawn(async move {
        let mut task = tokio::spawn(producer(emitter));
        let outcome = tokio::select! {
            outcome = &mut task => outcome,
            _ = watch.closed() => {
                task.abort();
                info!("Stream consumer went away; producer cancelled");
                return;
            }
        };
        drop(watch);

        let terminal = match outcome {
            Ok(Ok(content)) => StreamEvent::Done(content),
            Ok(Err(e)) => {
                warn!("Stream producer failed: {:#}", e);
                StreamEvent::Error(e.to_string())
            }
            Err(join_err) => {
                error!("Stream producer aborted: {}", join_err);
                StreamEvent::Error("Internal error while producing the response".to_string())
            }
        };

        // Taking the sender closes the emitter side before the terminal
        // event goes out.
        let sender = shared.lock().await.take();
        if let Some(tx) = sender {
            let _ = tx.send(terminal).await;
        }
    });

    ReceiverStream::new(rx)
}
