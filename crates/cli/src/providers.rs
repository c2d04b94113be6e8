//! Embedding and chat backends for the CLI.

use crate::config::ProviderConfig;
use crate::flags::ProviderMode;
use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use kb_retrieval::{EmbeddingProvider, GenerationRequest, TextGenerator};
use kb_vector_store::tokenize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Dimension of the offline stub embeddings.
pub(crate) const STUB_DIMENSION: usize = 64;

pub(crate) struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub generator: Arc<dyn TextGenerator>,
}

pub(crate) fn build_providers(config: &ProviderConfig) -> Result<Providers> {
    match config.mode {
        ProviderMode::Stub => {
            log::debug!("Using offline stub providers");
            Ok(Providers {
                embedder: Arc::new(StubEmbedder),
                generator: Arc::new(StubGenerator),
            })
        }
        ProviderMode::Http => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .context("Failed to build HTTP client")?;
            let api = Arc::new(OpenAiCompatible {
                client,
                base_url: config.api_base.trim_end_matches('/').to_string(),
                api_key: config.api_key.clone(),
                embed_model: config.embed_model.clone(),
                chat_model: config.chat_model.clone(),
            });
            if api.api_key.is_none() {
                log::warn!("No API key configured; requests are sent unauthenticated");
            }
            Ok(Providers {
                embedder: api.clone(),
                generator: api,
            })
        }
    }
}

// OpenAI-compatible HTTP API

pub(crate) struct OpenAiCompatible {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    embed_model: String,
    chat_model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatible {
    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

async fn check_status(resp: reqwest::Response, api: &str) -> Result<reqwest::Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("{api} API returned {status}: {body}");
    }
    Ok(resp)
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatible {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .post("/v1/embeddings")
            .json(&EmbedRequest {
                model: &self.embed_model,
                input: texts,
            })
            .send()
            .await
            .context("Failed to call embeddings API")?;
        let body: EmbedResponse = check_status(resp, "Embeddings")
            .await?
            .json()
            .await
            .context("Failed to parse embeddings response")?;

        let mut data = body.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatible {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let resp = self
            .post("/v1/chat/completions")
            .json(&ChatRequest {
                model: &self.chat_model,
                messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            })
            .send()
            .await
            .context("Failed to call chat completions API")?;
        let body: ChatResponse = check_status(resp, "Chat completions")
            .await?
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

// Offline stub

/// Hashed bag-of-tokens embedding, L2-normalised.
pub(crate) struct StubEmbedder;

impl StubEmbedder {
    pub(crate) fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; STUB_DIMENSION];
        for token in tokenize(text) {
            v[fnv1a(&token) as usize % STUB_DIMENSION] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            v[0] = 1.0;
        }
        v
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Never expands queries; answers with the top context line.
pub(crate) struct StubGenerator;

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        if request.system.is_none() {
            return Ok(String::new());
        }
        let first_line = request
            .prompt
            .strip_prefix("Context:\n")
            .and_then(|rest| rest.lines().next())
            .unwrap_or_default();
        Ok(first_line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_vector_store::cosine_similarity;

    #[tokio::test]
    async fn stub_embeddings_are_deterministic_and_normalised() {
        let texts = vec!["refund policy".to_string(), "".to_string()];
        let first = StubEmbedder.embed(&texts).await.unwrap();
        let second = StubEmbedder.embed(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].len(), STUB_DIMENSION);
        let norm: f32 = first[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(first[1][0], 1.0);
    }

    #[test]
    fn stub_embeddings_favour_shared_tokens() {
        let query = StubEmbedder::vector("refund window");
        let related = StubEmbedder::vector("the refund window is thirty days");
        let unrelated = StubEmbedder::vector("quantum particles");
        let close = cosine_similarity(&query, &related).unwrap();
        let far = cosine_similarity(&query, &unrelated).unwrap();
        assert!(close > far);
    }

    #[tokio::test]
    async fn stub_generator_skips_expansion_and_echoes_context() {
        let expansion = GenerationRequest::new("Generate 3 short alternative ...", 0.2, 120);
        assert_eq!(StubGenerator.generate(expansion).await.unwrap(), "");

        let answer = GenerationRequest::new(
            "Context:\n[d1 c1 p1] Refunds within 30 days.\n[d1 c2 p2] other\n\nQuestion: q",
            0.2,
            800,
        )
        .system("sys");
        assert_eq!(
            StubGenerator.generate(answer).await.unwrap(),
            "[d1 c1 p1] Refunds within 30 days."
        );
    }

    #[test]
    fn http_mode_builds_without_network() {
        let providers = build_providers(&ProviderConfig::default());
        assert!(providers.is_ok());
    }
}
