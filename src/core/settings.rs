use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Inference engine configuration, mutable at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub model: String,
    #[serde(alias = "ollama_url")]
    pub endpoint: String,
    pub temperature: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Partial update. Absent keys keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub model: Option<String>,
    #[serde(alias = "ollama_url")]
    pub endpoint: Option<String>,
    pub temperature: Option<f32>,
}

/// Process-wide engine settings plus a version counter. Every successful
/// update bumps the version; engine handles built from an older version
/// are stale.
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<EngineSettings>,
    version: AtomicU64,
}

impl SettingsStore {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let settings = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_str::<EngineSettings>(&raw) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Ignoring unreadable settings file {}: {}", path.display(), e);
                    EngineSettings::default()
                }
            }
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path: Some(path),
            current: RwLock::new(settings),
            version: AtomicU64::new(1),
        })
    }

    #[cfg(test)]
    pub fn in_memory(settings: EngineSettings) -> Self {
        Self {
            path: None,
            current: RwLock::new(settings),
            version: AtomicU64::new(1),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> (EngineSettings, u64) {
        let guard = self.current.read().await;
        (guard.clone(), self.version())
    }

    pub async fn update(&self, patch: SettingsPatch) -> Result<(EngineSettings, u64)> {
        let mut guard = self.current.write().await;
        let mut next = guard.clone();

        if let Some(model) = patch.model {
            let model = model.trim();
            if model.is_empty() {
                bail!("model must not be blank");
            }
            next.model = model.to_string();
        }
        if let Some(endpoint) = patch.endpoint {
            let endpoint = endpoint.trim().trim_end_matches('/');
            if endpoint.is_empty() {
                bail!("endpoint must not be blank");
            }
            next.endpoint = endpoint.to_string();
        }
        if let Some(t) = patch.temperature {
            if !t.is_finite() {
                bail!("temperature must be a number");
            }
            next.temperature = t.clamp(0.0, 2.0);
        }

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let body = serde_json::to_string_pretty(&next)?;
            tokio::fs::write(path, body)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
        }

        *guard = next.clone();
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Engine settings updated (v{}): model={} endpoint={} temperature={}",
            version, next.model, next.endpoint, next.temperature
        );
        Ok((next, version))
    }
}
