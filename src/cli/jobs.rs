use anyhow::{Result, bail};
use std::sync::Arc;
use tokio_stream::StreamExt;

use crate::core::config::AppConfig;
use crate::core::jobs::training::Toolchain;
use crate::core::jobs::{JobKind, JobRegistry, JobRunner, JobState};
use crate::core::stream::StreamEvent;
use crate::core::terminal::{self, print_success};

/// Runs a job in the foreground. Only the toolchain is needed, so the
/// rest of the services are never opened.
pub(super) async fn run(config: AppConfig, kind: JobKind) -> Result<()> {
    crate::logging::init(true);
    let toolchain = Toolchain::new(config.file.training.clone(), &config.training_dir())
        .with_messages_db(config.messages_db());
    let runner = JobRunner::new(Arc::new(JobRegistry::new()));

    terminal::print_step(&format!("Running {kind}"));
    let mut events = runner.start(kind, toolchain.operation(kind), toolchain.fallback(kind))?;

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Log(line) => println!("{line}"),
            StreamEvent::Done(state) if state == JobState::Done.as_str() => {
                print_success(&format!("{kind} finished"));
            }
            StreamEvent::Done(state) => bail!("{kind} ended with state {state}"),
            StreamEvent::Error(e) => bail!(e),
            StreamEvent::Status(s) | StreamEvent::Token(s) => terminal::print_progress(&s),
        }
    }
    Ok(())
}
