//! Durable configuration record: active model, provider endpoint, provider kind.
//!
//! The record is read fresh by the engine every time a session is built, so a
//! settings change takes effect on the next session without restarting the
//! process. Writes go through a temp file + rename so a concurrent session
//! build never observes a partially written record.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::{AgentError, Result};

/// Where the configured endpoint lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Loopback inference server (e.g. Ollama).
    #[default]
    Local,
    /// OpenAI-compatible remote API.
    Remote,
}

impl ProviderKind {
    /// Classify an endpoint by its host.
    pub fn from_base_url(base_url: &str) -> Self {
        match Url::parse(base_url).ok().and_then(|u| match u.host() {
            Some(url::Host::Domain(d)) => Some(d == "localhost"),
            Some(url::Host::Ipv4(ip)) => Some(ip.is_loopback()),
            Some(url::Host::Ipv6(ip)) => Some(ip.is_loopback()),
            None => None,
        }) {
            Some(true) => Self::Local,
            _ => Self::Remote,
        }
    }
}

/// The persisted configuration record. Read/written as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier passed to the provider.
    pub model: String,
    /// Provider endpoint base URL.
    pub base_url: String,
    /// Derived from `base_url`, stored explicitly.
    #[serde(default)]
    pub provider_kind: ProviderKind,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            base_url: "http://localhost:11434".to_string(),
            provider_kind: ProviderKind::Local,
        }
    }
}

/// Durable store for the configuration record.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current record, falling back to defaults when no file exists.
    pub fn load(&self) -> Result<AgentConfig> {
        if !self.path.exists() {
            return Ok(AgentConfig::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| AgentError::Storage(format!("read {}: {}", self.path.display(), e)))?;
        toml::from_str(&content).map_err(|e| {
            AgentError::Configuration(format!("malformed config {}: {}", self.path.display(), e))
        })
    }

    /// Persist the whole record atomically (temp file + rename).
    pub fn save(&self, config: &AgentConfig) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| AgentError::Storage(format!("create {}: {}", dir.display(), e)))?;
        }
        let content = toml::to_string_pretty(config)
            .map_err(|e| AgentError::Configuration(e.to_string()))?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| AgentError::Storage(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AgentError::Storage(format!("rename {}: {}", tmp.display(), e)))?;
        info!(model = %config.model, base_url = %config.base_url, "configuration saved");
        Ok(())
    }

    /// Settings surface: update model and/or endpoint, validating the URL
    /// before anything is written. Returns the record as persisted.
    pub fn set_config(
        &self,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Result<AgentConfig> {
        let mut config = self.load()?;
        if let Some(model) = model {
            if model.trim().is_empty() {
                return Err(AgentError::Configuration(
                    "model identifier must not be empty".to_string(),
                ));
            }
            config.model = model;
        }
        if let Some(base_url) = base_url {
            validate_base_url(&base_url)?;
            config.base_url = base_url;
        }
        // Keep the stored kind from ever disagreeing with the URL.
        config.provider_kind = ProviderKind::from_base_url(&config.base_url);
        self.save(&config)?;
        Ok(config)
    }
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let url = Url::parse(base_url)
        .map_err(|e| AgentError::Configuration(format!("invalid base_url '{}': {}", base_url, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AgentError::Configuration(format!(
            "base_url must be http(s), got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(AgentError::Configuration(format!(
            "base_url '{}' has no host",
            base_url
        )));
    }
    Ok(())
}
