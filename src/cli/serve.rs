use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::bootstrap::init_services;
use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{self, GuideSection};
use crate::interfaces::web::ApiServer;

pub(super) async fn run(config: AppConfig, api_host: String, api_port: u16) -> Result<()> {
    let log_tx = crate::logging::init(false);
    let services = init_services(&config).await?;

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(
        services,
        log_tx,
        api_host.clone(),
        api_port,
    ))));
    lifecycle.start().await?;

    terminal::print_banner();
    terminal::print_link("API", &format!("http://{}:{}/api", api_host, api_port));
    GuideSection::new("Server")
        .status("Data", &config.data_dir.display().to_string())
        .blank()
        .status(
            "Stop",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}
