use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::connectors::Connectors;
use crate::connectors::documents::DocumentStore;
use crate::connectors::mail::MailConnector;
use crate::connectors::messages::MessageConnector;
use crate::core::config::AppConfig;
use crate::core::context::ContextAssembler;
use crate::core::dispatch::DispatchGraph;
use crate::core::jobs::training::Toolchain;
use crate::core::jobs::{JobRegistry, JobRunner};
use crate::core::llm::{CompletionEngine, OllamaFactory};
use crate::core::memory::SessionStore;
use crate::core::settings::SettingsStore;
use crate::core::turn::Conversation;
use crate::tools::ToolExecutor;

/// Everything a front end needs, built once per process and shared.
#[derive(Clone)]
pub struct Services {
    pub conversation: Arc<Conversation>,
    pub engine: Arc<CompletionEngine>,
    pub connectors: Connectors,
    pub jobs: JobRunner,
    pub toolchain: Arc<Toolchain>,
}

pub async fn init_services(config: &AppConfig) -> Result<Services> {
    let settings = Arc::new(SettingsStore::load(config.settings_path()).await?);
    let engine = Arc::new(CompletionEngine::new(settings, Arc::new(OllamaFactory)));

    let documents = DocumentStore::open(&config.documents_db())
        .with_context(|| format!("opening {}", config.documents_db().display()))?;
    let connectors = Connectors {
        messages: Arc::new(MessageConnector::new(
            config.messages_db(),
            config.temp_dir(),
            config.send_timeout(),
        )),
        mail: Arc::new(MailConnector::new(config.send_timeout())),
        documents: Arc::new(documents),
    };

    let graph = Arc::new(DispatchGraph::new(
        engine.clone(),
        ToolExecutor::new(connectors.clone()),
        ContextAssembler::new(connectors.clone()),
        config.self_handle(),
    ));
    let sessions = Arc::new(
        SessionStore::open(&config.sessions_db())
            .with_context(|| format!("opening {}", config.sessions_db().display()))?,
    );
    let conversation = Arc::new(Conversation::new(sessions, graph));

    let toolchain = Arc::new(
        Toolchain::new(config.file.training.clone(), &config.training_dir())
            .with_messages_db(config.messages_db()),
    );
    info!("Services ready (data dir {})", config.data_dir.display());

    Ok(Services {
        conversation,
        engine,
        connectors,
        jobs: JobRunner::new(Arc::new(JobRegistry::new())),
        toolchain,
    })
}
