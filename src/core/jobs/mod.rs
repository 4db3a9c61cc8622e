//! Long-running external jobs, run off the request path.
//!
//! A job runs on a dedicated OS thread. The worker pushes log lines and a
//! final sentinel into an unbounded channel; an async reader re-emits them
//! as stream events. The worker always sends the sentinel, even when the
//! operation fails or panics, so the reader can never hang.

pub mod collect;
pub mod training;

use serde::Serialize;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::core::stream::{StreamEvent, spawn_stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CollectMessages,
    CollectEmail,
    TrainMessages,
    TrainEmail,
    RegisterMessages,
    RegisterEmail,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::CollectMessages,
        JobKind::CollectEmail,
        JobKind::TrainMessages,
        JobKind::TrainEmail,
        JobKind::RegisterMessages,
        JobKind::RegisterEmail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::CollectMessages => "collect_messages",
            JobKind::CollectEmail => "collect_email",
            JobKind::TrainMessages => "train_messages",
            JobKind::TrainEmail => "train_email",
            JobKind::RegisterMessages => "register_messages",
            JobKind::RegisterEmail => "register_email",
        }
    }

    pub fn parse(value: &str) -> Result<Self, JobError> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == value)
            .ok_or_else(|| JobError::UnknownKind(value.to_string()))
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

pub fn can_transition(from: JobState, to: JobState) -> bool {
    match from {
        JobState::Idle | JobState::Done | JobState::Error => matches!(to, JobState::Running),
        JobState::Running => matches!(to, JobState::Done | JobState::Error),
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("A {0} job is already running")]
    AlreadyRunning(JobKind),
    #[error("Unknown job kind: {0}")]
    UnknownKind(String),
    #[error("Could not start job worker: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: Option<String>,
    pub kind: JobKind,
    pub state: JobState,
}

/// Job state per kind. Every transition goes through one lock, so two
/// runs of the same kind can never both enter `running`.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobKind, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: JobKind) -> Job {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&kind).cloned().unwrap_or(Job {
            id: None,
            kind,
            state: JobState::Idle,
        })
    }

    pub fn state(&self, kind: JobKind) -> JobState {
        self.get(kind).state
    }

    fn begin(&self, kind: JobKind) -> Result<String, JobError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let current = jobs.get(&kind).map(|j| j.state).unwrap_or(JobState::Idle);
        if !can_transition(current, JobState::Running) {
            return Err(JobError::AlreadyRunning(kind));
        }
        let id = uuid::Uuid::new_v4().to_string();
        jobs.insert(
            kind,
            Job {
                id: Some(id.clone()),
                kind,
                state: JobState::Running,
            },
        );
        Ok(id)
    }

    fn finish(&self, kind: JobKind, id: &str, state: JobState) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        match jobs.get_mut(&kind) {
            Some(job) if job.id.as_deref() == Some(id) && can_transition(job.state, state) => {
                job.state = state;
            }
            _ => warn!("Ignoring stale finish for {} job {}", kind, id),
        }
    }
}

enum JobItem {
    Log(String),
    Finished(JobState),
}

/// Worker-side log handle. Sending never blocks; lines sent after the
/// reader went away are dropped.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<JobItem>,
}

impl LogSink {
    pub fn line(&self, line: impl Into<String>) {
        let _ = self.tx.send(JobItem::Log(line.into()));
    }
}

pub type JobOp = Box<dyn FnOnce(&LogSink) -> anyhow::Result<String> + Send + 'static>;

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Starts `op` on its own thread and returns its event stream: `log`
    /// lines in production order, then exactly one `done` carrying the
    /// final state. `fallback` lines are emitted only after a failure,
    /// just before the terminal event.
    pub fn start(
        &self,
        kind: JobKind,
        op: JobOp,
        fallback: Vec<String>,
    ) -> Result<ReceiverStream<StreamEvent>, JobError> {
        let id = self.registry.begin(kind)?;
        info!("Job {} ({}) started", kind, id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = self.registry.clone();
        let worker_id = id.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("job-{}", kind))
            .spawn(move || {
                let sink = LogSink { tx: tx.clone() };
                let state = match catch_unwind(AssertUnwindSafe(|| op(&sink))) {
                    Ok(Ok(summary)) => {
                        if !summary.is_empty() {
                            sink.line(summary);
                        }
                        JobState::Done
                    }
                    Ok(Err(e)) => {
                        sink.line(format!("[error] {e:#}"));
                        JobState::Error
                    }
                    Err(payload) => {
                        sink.line(format!(
                            "[error] job worker panicked: {}",
                            panic_message(payload.as_ref())
                        ));
                        JobState::Error
                    }
                };
                registry.finish(kind, &worker_id, state);
                info!("Job {} ({}) finished: {}", kind, worker_id, state.as_str());
                let _ = tx.send(JobItem::Finished(state));
            });

        if let Err(e) = spawned {
            error!("Could not spawn worker for {}: {}", kind, e);
            self.registry.finish(kind, &id, JobState::Error);
            return Err(JobError::Spawn(e.to_string()));
        }

        Ok(spawn_stream(move |events| async move {
            while let Some(item) = rx.recv().await {
                match item {
                    JobItem::Log(line) => {
                        events.log(line).await;
                    }
                    JobItem::Finished(state) => {
                        if state == JobState::Error {
                            for line in fallback {
                                events.log(line).await;
                            }
                        }
                        return Ok(state.as_str().to_string());
                    }
                }
            }
            // Channel closed without a sentinel; only possible if the
            // worker thread itself died.
            Ok(JobState::Error.as_str().to_string())
        }))
    }
}
