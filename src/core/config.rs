use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DATA_DIR_ENV: &str = "COURIER_DATA_DIR";
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8000;

/// Fine-tuning toolchain knobs, read from the `[training]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub python: String,
    pub ollama: String,
    pub base_model: String,
    pub iters: u32,
    pub learning_rate: f64,
    pub batch_size: u32,
    /// How far back dataset collection reaches.
    pub collect_months: u32,
    pub osascript: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            ollama: "ollama".to_string(),
            base_model: "mlx-community/Llama-3.2-3B-Instruct-4bit".to_string(),
            iters: 500,
            learning_rate: 1e-4,
            batch_size: 4,
            collect_months: 6,
            osascript: "osascript".to_string(),
        }
    }
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_host: String,
    pub api_port: u16,
    pub send_timeout_secs: u64,
    pub messages_db: Option<PathBuf>,
    pub self_handle: Option<String>,
    pub training: TrainingConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            send_timeout_secs: 15,
            messages_db: None,
            self_handle: None,
            training: TrainingConfig::default(),
        }
    }
}

/// Process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub file: FileConfig,
}

impl AppConfig {
    /// Resolves the data dir, creates its layout and reads `config.toml`
    /// if present.
    pub fn load() -> Result<Self> {
        Self::load_from(default_data_dir())
    }

    pub fn load_from(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let config_path = data_dir.join("config.toml");
        let file = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", config_path.display()))?
        } else {
            FileConfig::default()
        };

        let config = Self { data_dir, file };
        for dir in [config.temp_dir(), config.training_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        info!("Using data directory {}", config.data_dir.display());
        Ok(config)
    }

    pub fn sessions_db(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    pub fn documents_db(&self) -> PathBuf {
        self.data_dir.join("documents.db")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    pub fn training_dir(&self) -> PathBuf {
        self.data_dir.join("training")
    }

    pub fn messages_db(&self) -> PathBuf {
        self.file.messages_db.clone().unwrap_or_else(default_messages_db)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.file.send_timeout_secs.max(1))
    }

    pub fn self_handle(&self) -> Option<String> {
        self.file
            .self_handle
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| Path::new(".").to_path_buf())
}

pub fn default_data_dir() -> PathBuf {
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => home().join(".courier"),
    }
}

fn default_messages_db() -> PathBuf {
    home().join("Library").join("Messages").join("chat.db")
}
