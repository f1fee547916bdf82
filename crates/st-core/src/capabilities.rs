//! Learned per-model limits.
//!
//! When a task fails with a rate-limit or context-overflow error, the limits
//! the backend reported are remembered against the model id so later
//! requests can stay under them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use st_types::ErrorMeta;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("capability store format: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Receives capability corrections derived from classified errors.
pub trait CapabilityStore: Send {
    fn learn(&mut self, model: &str, meta: &ErrorMeta) -> Result<(), CapabilityError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilityOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_seconds: Option<u64>,
    #[serde(default)]
    pub last_error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ModelCapabilityOverride {
    fn absorb(&mut self, meta: &ErrorMeta) {
        if let Some(max) = meta.max_context_tokens {
            self.max_input_tokens = Some(max);
        }
        if let Some(info) = &meta.rate_limit {
            self.rate_limit_info = Some(info.clone());
        }
        if let Some(secs) = meta.rate_limit_seconds {
            self.rate_limit_seconds = Some(secs);
        }
        self.last_error = if meta.summary.is_empty() {
            meta.error_type.as_str().to_string()
        } else {
            meta.summary.clone()
        };
        self.last_error_at = Some(Utc::now());
    }
}

/// Capability overrides keyed by model id, optionally mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct ModelCapabilities {
    path: Option<PathBuf>,
    models: BTreeMap<String, ModelCapabilityOverride>,
}

impl ModelCapabilities {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CapabilityError> {
        let path = path.into();
        let models = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), models = models.len(), "capability store opened");
        Ok(Self {
            path: Some(path),
            models,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, model: &str) -> Option<&ModelCapabilityOverride> {
        self.models.get(model)
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelCapabilityOverride)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Learned input limit when present, otherwise the advertised one.
    pub fn effective_max_input(&self, model: &str, advertised: u64) -> u64 {
        self.get(model)
            .and_then(|c| c.max_input_tokens)
            .unwrap_or(advertised)
    }

    fn save(&self) -> Result<(), CapabilityError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.models)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl CapabilityStore for ModelCapabilities {
    fn learn(&mut self, model: &str, meta: &ErrorMeta) -> Result<(), CapabilityError> {
        self.models.entry(model.to_string()).or_default().absorb(meta);
        tracing::info!(
            model,
            error_type = %meta.error_type,
            max_context_tokens = ?meta.max_context_tokens,
            rate_limit = ?meta.rate_limit,
            "learned model capability"
        );
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_classifier::classify;

    #[test]
    fn learn_merges_into_existing_entry() {
        let mut store = ModelCapabilities::in_memory();
        store
            .learn("gpt-4o", &classify("maximum context length is 128000 tokens", None))
            .unwrap();
        store
            .learn("gpt-4o", &classify("Rate limit exceeded, 10 per 60s", None))
            .unwrap();

        let caps = store.get("gpt-4o").unwrap();
        assert_eq!(caps.max_input_tokens, Some(128_000));
        assert_eq!(caps.rate_limit_info.as_deref(), Some("10 per 60s"));
        assert_eq!(caps.rate_limit_seconds, Some(60));
        assert!(caps.last_error.starts_with("🚦"));
        assert!(caps.last_error_at.is_some());
        assert_eq!(store.effective_max_input("gpt-4o", 200_000), 128_000);
        assert_eq!(store.effective_max_input("other", 200_000), 200_000);
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("caps.json");

        let mut store = ModelCapabilities::open(&path).unwrap();
        assert_eq!(store.models().count(), 0);
        store
            .learn("m1", &classify("Max size: 8000 tokens", None))
            .unwrap();

        let reopened = ModelCapabilities::open(&path).unwrap();
        assert_eq!(reopened.get("m1").unwrap().max_input_tokens, Some(8_000));
        assert_eq!(reopened.path(), Some(path.as_path()));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caps.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            ModelCapabilities::open(&path),
            Err(CapabilityError::Serde(_))
        ));
    }
}
