use crate::flags::ProviderMode;
use anyhow::{Context as AnyhowContext, Result};
use kb_retrieval::RetrievalConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub(crate) const PROVIDER_ENV: &str = "KB_PROVIDER";
pub(crate) const API_BASE_ENV: &str = "KB_API_BASE";
pub(crate) const API_KEY_ENV: &str = "KB_API_KEY";
pub(crate) const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub(crate) const EMBED_MODEL_ENV: &str = "KB_EMBED_MODEL";
pub(crate) const CHAT_MODEL_ENV: &str = "KB_CHAT_MODEL";

pub(crate) const DEFAULT_API_BASE: &str = "https://api.openai.com";
pub(crate) const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
pub(crate) const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub(crate) const DEFAULT_NAMESPACE: &str = "pdf";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ProviderConfig {
    pub mode: ProviderMode,
    pub api_base: String,
    pub api_key: Option<String>,
    pub embed_model: String,
    pub chat_model: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Http,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// `kb.toml`: a `[provider]` table and a `[retrieval]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct CliConfig {
    pub provider: ProviderConfig,
    pub retrieval: RetrievalConfig,
}

impl CliConfig {
    /// Reads `explicit` when given (it must exist), otherwise `fallback`
    /// when present, otherwise defaults. Environment overrides apply last.
    pub(crate) fn load(explicit: Option<&Path>, fallback: &Path) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::read(path)?,
            None if fallback.exists() => Self::read(fallback)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        config.retrieval.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub(crate) fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = lookup(PROVIDER_ENV) {
            match ProviderMode::parse(&raw) {
                Some(mode) => self.provider.mode = mode,
                None => log::warn!("Ignoring unknown {PROVIDER_ENV}={raw}"),
            }
        }
        if let Some(base) = lookup(API_BASE_ENV) {
            self.provider.api_base = base;
        }
        if let Some(key) = lookup(API_KEY_ENV).or_else(|| lookup(OPENAI_API_KEY_ENV)) {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = lookup(EMBED_MODEL_ENV) {
            self.provider.embed_model = model;
        }
        if let Some(model) = lookup(CHAT_MODEL_ENV) {
            self.provider.chat_model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(None, &dir.path().join("kb.toml")).unwrap();
        assert_eq!(config.retrieval, RetrievalConfig::default());
        assert_eq!(config.provider.embed_model, DEFAULT_EMBED_MODEL);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(CliConfig::load(Some(&missing), &missing).is_err());
    }

    #[test]
    fn parses_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.toml");
        fs::write(
            &path,
            r#"
                [provider]
                mode = "stub"
                chat_model = "local-chat"

                [retrieval]
                top_k = 7
                use_expansion = false
            "#,
        )
        .unwrap();
        let config = CliConfig::read(&path).unwrap();
        assert_eq!(config.provider.mode, ProviderMode::Stub);
        assert_eq!(config.provider.chat_model, "local-chat");
        assert_eq!(config.provider.api_base, DEFAULT_API_BASE);
        assert_eq!(config.retrieval.top_k, 7);
        assert!(!config.retrieval.use_expansion);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (PROVIDER_ENV, "stub"),
            (API_BASE_ENV, "http://localhost:11434"),
            (OPENAI_API_KEY_ENV, "sk-fallback"),
            (EMBED_MODEL_ENV, ""),
        ]);
        let mut config = CliConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.provider.mode, ProviderMode::Stub);
        assert_eq!(config.provider.api_base, "http://localhost:11434");
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-fallback"));
        assert_eq!(config.provider.embed_model, DEFAULT_EMBED_MODEL);
    }
}
