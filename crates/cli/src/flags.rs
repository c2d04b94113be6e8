use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ProviderMode {
    /// OpenAI-compatible HTTP API
    #[default]
    Http,
    /// Deterministic offline providers (no network)
    Stub,
}

impl ProviderMode {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            ProviderMode::Http => "http",
            ProviderMode::Stub => "stub",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" | "openai" => Some(ProviderMode::Http),
            "stub" => Some(ProviderMode::Stub),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub(crate) enum Bm25ScopeFlag {
    /// Statistics over every record in the store
    Store,
    /// Per-namespace statistics for namespace-constrained queries
    Namespace,
}

impl Bm25ScopeFlag {
    pub(crate) const fn as_domain(self) -> kb_vector_store::Bm25Scope {
        match self {
            Bm25ScopeFlag::Store => kb_vector_store::Bm25Scope::Store,
            Bm25ScopeFlag::Namespace => kb_vector_store::Bm25Scope::Namespace,
        }
    }
}
