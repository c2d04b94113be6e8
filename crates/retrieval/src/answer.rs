use crate::context::Source;
use crate::error::{Result, RetrievalError};
use crate::pipeline::Retrieval;
use crate::provider::{GenerationRequest, TextGenerator};
use serde::Serialize;

pub const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use ONLY the provided context. \
     Cite sources by [docId chunkId p<page>]. If unsure, say you don't know.";

/// Returned without calling the generator when retrieval found nothing.
pub const NO_CONTEXT_ANSWER: &str = "I don't know. No relevant context was found.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub context: String,
}

#[must_use]
pub fn build_answer_prompt(question: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {question}")
}

/// Answers `question` from the stitched context of `retrieval`.
pub async fn synthesize_answer(
    generator: &dyn TextGenerator,
    question: &str,
    retrieval: &Retrieval,
    temperature: f32,
    max_tokens: u32,
) -> Result<Answer> {
    if retrieval.context.trim().is_empty() {
        log::info!("Empty context, skipping generation");
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: retrieval.sources.clone(),
            context: String::new(),
        });
    }

    let request = GenerationRequest::new(
        build_answer_prompt(question, &retrieval.context),
        temperature,
        max_tokens,
    )
    .system(ANSWER_SYSTEM_PROMPT);

    let answer = generator
        .generate(request)
        .await
        .map_err(|err| RetrievalError::Generation(format!("{err:#}")))?;

    Ok(Answer {
        answer: answer.trim().to_string(),
        sources: retrieval.sources.clone(),
        context: retrieval.context.clone(),
    })
}
