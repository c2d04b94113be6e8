use crate::provider::{GenerationRequest, TextGenerator};
use std::sync::Arc;

pub const DEFAULT_EXPANSION_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_EXPANSION_MAX_TOKENS: u32 = 120;

/// Best-effort multi-query expansion backed by a text generator.
///
/// The result always starts with the original query and never fails: any
/// generator error degrades to the unexpanded query.
#[derive(Clone)]
pub struct QueryExpander {
    generator: Option<Arc<dyn TextGenerator>>,
    temperature: f32,
    max_tokens: u32,
}

impl QueryExpander {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator: Some(generator),
            temperature: DEFAULT_EXPANSION_TEMPERATURE,
            max_tokens: DEFAULT_EXPANSION_MAX_TOKENS,
        }
    }

    /// Expander that never calls out and always returns `[query]`.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            generator: None,
            temperature: DEFAULT_EXPANSION_TEMPERATURE,
            max_tokens: DEFAULT_EXPANSION_MAX_TOKENS,
        }
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Up to `max(n, 1)` query variants, the original first.
    pub async fn expand(&self, query: &str, n: usize) -> Vec<String> {
        if n <= 1 {
            return vec![query.to_string()];
        }
        let Some(generator) = &self.generator else {
            return vec![query.to_string()];
        };

        let request = GenerationRequest::new(
            Self::build_prompt(query, n),
            self.temperature,
            self.max_tokens,
        );
        match generator.generate(request).await {
            Ok(text) => {
                let variants = Self::parse_variants(query, &text, n);
                log::debug!("Expanded '{}' into {} variants", query, variants.len());
                variants
            }
            Err(err) => {
                log::warn!("Query expansion failed, using original query only: {err:#}");
                vec![query.to_string()]
            }
        }
    }

    #[must_use]
    pub fn build_prompt(query: &str, n: usize) -> String {
        format!(
            "Generate {n} short alternative search queries that could help retrieve relevant \
             passages for the following question. Keep each on a new line, no numbering or \
             punctuation beyond the query itself. Question: \"{query}\""
        )
    }

    /// One variant per non-empty line (at most `n`), original query first,
    /// exact duplicates removed, capped at `max(n, 1)`.
    #[must_use]
    pub fn parse_variants(query: &str, response: &str, n: usize) -> Vec<String> {
        let generated = response
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(n);

        let mut variants: Vec<String> = vec![query.to_string()];
        for candidate in generated {
            if !variants.iter().any(|v| v == candidate) {
                variants.push(candidate.to_string());
            }
        }
        variants.truncate(n.max(1));
        variants
    }
}

impl std::fmt::Debug for QueryExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExpander")
            .field("enabled", &self.is_enabled())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        reply: anyhow::Result<String>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(anyhow::anyhow!("connection reset")),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, request: GenerationRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.temperature, DEFAULT_EXPANSION_TEMPERATURE);
            assert_eq!(request.max_tokens, DEFAULT_EXPANSION_MAX_TOKENS);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    #[tokio::test]
    async fn single_variant_skips_the_generator() {
        let generator = Scripted::ok("other");
        let expander = QueryExpander::new(generator.clone());
        assert_eq!(expander.expand("what is bm25", 1).await, vec!["what is bm25"]);
        assert_eq!(expander.expand("what is bm25", 0).await, vec!["what is bm25"]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generator_failure_degrades_to_original_query() {
        let generator = Scripted::failing();
        let expander = QueryExpander::new(generator.clone());
        assert_eq!(expander.expand("refund policy", 3).await, vec!["refund policy"]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expands_and_keeps_original_first() {
        let expander = QueryExpander::new(Scripted::ok(
            "  how are refunds handled \r\n\nrefund policy\nmoney back rules\nreturn window\n",
        ));
        let variants = expander.expand("refund policy", 3).await;
        assert_eq!(
            variants,
            vec!["refund policy", "how are refunds handled", "money back rules"]
        );
    }

    #[tokio::test]
    async fn disabled_expander_returns_query() {
        let expander = QueryExpander::disabled();
        assert!(!expander.is_enabled());
        assert_eq!(expander.expand("q", 4).await, vec!["q"]);
    }

    #[test]
    fn empty_response_yields_only_query() {
        assert_eq!(QueryExpander::parse_variants("q", "\n  \n", 3), vec!["q"]);
    }

    #[test]
    fn parse_caps_generated_lines_before_dedup() {
        // Only the first n lines are considered, even if one is a duplicate.
        let variants = QueryExpander::parse_variants("q", "q\na\nb\nc", 3);
        assert_eq!(variants, vec!["q", "a", "b"]);
        let variants = QueryExpander::parse_variants("q", "a\na\nb", 2);
        assert_eq!(variants, vec!["q", "a"]);
    }

    #[test]
    fn prompt_mentions_count_and_question() {
        let prompt = QueryExpander::build_prompt("why is the sky blue", 4);
        assert!(prompt.contains("Generate 4 short alternative search queries"));
        assert!(prompt.contains("\"why is the sky blue\""));
    }
}
