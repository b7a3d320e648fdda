//! Retrieval-augmented question answering.
//!
//! One pass per question: retrieve ranked chunks, pack them into a bounded
//! context, fill the prompt template, call the model once. No retries.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::error::QaError;
use crate::index::Retriever;
use crate::llm::ChatModel;
use crate::models::RetrievedChunk;

/// Instruction template. Placeholders: `{context}`, `{question}`, `{fallback}`.
pub const PROMPT_TEMPLATE: &str = "\
You are a helpful assistant answering questions about the user's documents.
Answer the question using only the context below. Be concise and accurate.
If the answer is not contained in the context, reply with exactly:
{fallback}

Context:
{context}

Question: {question}

Answer:";

#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub k: usize,
    pub fetch_k: usize,
    pub max_context_chars: usize,
    pub fallback_phrase: String,
}

impl ChainSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            fetch_k: config.retrieval.fetch_k,
            max_context_chars: config.retrieval.max_context_chars,
            fallback_phrase: config.generation.fallback_phrase.clone(),
        }
    }
}

/// A generated answer and the chunks it was grounded on, in ranked order.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

pub struct QaChain {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn ChatModel>,
    settings: ChainSettings,
}

impl QaChain {
    pub fn new(retriever: Arc<dyn Retriever>, llm: Arc<dyn ChatModel>, settings: ChainSettings) -> Self {
        Self {
            retriever,
            llm,
            settings,
        }
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, QaError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QaError::invalid_question("question is empty"));
        }

        let sources = self
            .retriever
            .retrieve(question, self.settings.k, self.settings.fetch_k)
            .await
            .map_err(QaError::retrieval)?;

        if sources.is_empty() {
            tracing::debug!("no chunks retrieved, answering with fallback phrase");
            return Ok(Answer {
                text: self.settings.fallback_phrase.clone(),
                sources,
            });
        }

        let context = build_context(&sources, self.settings.max_context_chars);
        let prompt = render_prompt(&context, question, &self.settings.fallback_phrase);
        tracing::debug!(
            chunks = sources.len(),
            context_chars = context.chars().count(),
            model = self.llm.model_name(),
            "generating answer"
        );

        let text = self.llm.chat(&prompt).await.map_err(QaError::generation)?;
        if text.trim().is_empty() {
            return Err(QaError::generation(anyhow::anyhow!(
                "model returned an empty response"
            )));
        }

        Ok(Answer { text, sources })
    }
}

/// Chunk texts in ranked order separated by blank lines, at most `max_chars`
/// characters. Only whole chunks are added after the first; the first is
/// truncated if it alone exceeds the limit.
pub fn build_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let len = chunk.text.chars().count();
        if i == 0 {
            if len > max_chars {
                return chunk.text.chars().take(max_chars).collect();
            }
            context.push_str(&chunk.text);
            used = len;
            continue;
        }
        if used + 2 + len > max_chars {
            break;
        }
        context.push_str("\n\n");
        context.push_str(&chunk.text);
        used += 2 + len;
    }

    context
}

pub fn render_prompt(context: &str, question: &str, fallback: &str) -> String {
    fill_template(
        PROMPT_TEMPLATE,
        &[
            ("context", context),
            ("question", question),
            ("fallback", fallback),
        ],
    )
}

/// Single-pass substitution; placeholder-like text inside values is left alone.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let name = &after[..end];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
