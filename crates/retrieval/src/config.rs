use crate::error::{Result, RetrievalError};
use crate::query_expansion::{DEFAULT_EXPANSION_MAX_TOKENS, DEFAULT_EXPANSION_TEMPERATURE};
use kb_vector_store::{DEFAULT_ALPHA, DEFAULT_TOP_K};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VARIANT_COUNT: usize = 3;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 4000;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;
pub const DEFAULT_ANSWER_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_ANSWER_MAX_TOKENS: u32 = 800;

/// Retrieval defaults, usually read from the `[retrieval]` table of the
/// config file. Missing keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub alpha: f32,
    pub use_expansion: bool,
    pub variant_count: usize,
    pub max_context_chars: usize,
    pub namespace: Option<String>,
    pub embed_batch_size: usize,
    pub expansion_temperature: f32,
    pub expansion_max_tokens: u32,
    pub answer_temperature: f32,
    pub answer_max_tokens: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            alpha: DEFAULT_ALPHA,
            use_expansion: true,
            variant_count: DEFAULT_VARIANT_COUNT,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            namespace: None,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            expansion_temperature: DEFAULT_EXPANSION_TEMPERATURE,
            expansion_max_tokens: DEFAULT_EXPANSION_MAX_TOKENS,
            answer_temperature: DEFAULT_ANSWER_TEMPERATURE,
            answer_max_tokens: DEFAULT_ANSWER_MAX_TOKENS,
        }
    }
}

impl RetrievalConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| RetrievalError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(RetrievalError::Config(format!(
                "alpha must be within [0, 1], got {}",
                self.alpha
            )));
        }
        if self.top_k == 0 {
            return Err(RetrievalError::Config("top_k must be positive".to_string()));
        }
        if self.embed_batch_size == 0 {
            return Err(RetrievalError::Config(
                "embed_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
