use anyhow::{Result, bail};
use std::io::Write;
use tokio_stream::StreamExt;

use crate::core::bootstrap::init_services;
use crate::core::config::AppConfig;
use crate::core::stream::StreamEvent;
use crate::core::terminal;
use crate::core::turn::TurnRequest;

/// Runs one turn in a fresh session and prints events as they arrive.
pub(super) async fn run(config: AppConfig, utterance: String) -> Result<()> {
    crate::logging::init(true);
    let services = init_services(&config).await?;

    let mut events = services.conversation.stream(TurnRequest {
        session_id: None,
        message: utterance,
    });

    let mut stdout = std::io::stdout();
    let mut streaming = false;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Status(s) | StreamEvent::Log(s) => terminal::print_progress(&s),
            StreamEvent::Token(t) => {
                if !streaming {
                    println!();
                    streaming = true;
                }
                print!("{t}");
                stdout.flush()?;
            }
            StreamEvent::Done(session_id) => {
                println!("\n");
                terminal::print_status("Session", &session_id);
            }
            StreamEvent::Error(e) => {
                if streaming {
                    println!();
                }
                bail!(e);
            }
        }
    }
    Ok(())
}
