//! Conversational question answering over retrieved document context.
//!
//! A question goes through retrieval (embed + nearest chunks), prompt assembly
//! (system block, history, cited context, question) and generation. Only a
//! successful generation is recorded in the history, so a failed turn never shows
//! up in later prompts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::chunking::Chunk;
use crate::document::DocumentMetadata;
use crate::embedding::Embed;
use crate::generation::{GenerationRequest, Generator, TEMPERATURE};
use crate::retrieval::{DEFAULT_TOP_K, Retriever};

pub const REFUSAL: &str =
    "Unfortunately, the provided documents do not contain a precise answer to this question.";

pub const APOLOGY: &str =
    "We apologize, a technical error occurred while generating the answer. Please try again.";

pub const NO_HISTORY: &str = "No conversation history.";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional assistant for legal documents. \
Your task is to answer questions on the basis of the legal documents provided as context. \
Answers must be precise, grounded in facts, and written in the same language as the question.

Instructions:
1. Use only the provided context to generate the answer.
2. If the context does not contain the answer, reply politely with: 'Unfortunately, the provided documents do not contain a precise answer to this question.'
3. Always cite the sources (document and page) at the end of the answer.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// What a session hands back for one question. `citations` is a `"; "`-joined
/// list of distinct labels, best match first, and empty when generation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub citations: String,
}

impl Answer {
    fn apology() -> Self {
        Self {
            answer: APOLOGY.to_string(),
            citations: String::new(),
        }
    }
}

/// The assembled generation prompt and the distinct citation labels it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub citations: Vec<String>,
}

/// `"<source> (p. <page>)"`
pub fn citation_label(metadata: &DocumentMetadata) -> String {
    format!("{} (p. {})", metadata.source, metadata.page)
}

pub fn render_history(history: &[Turn]) -> String {
    if history.is_empty() {
        return NO_HISTORY.to_string();
    }
    history
        .iter()
        .map(|turn| format!("User: {}\nAssistant: {}", turn.question, turn.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One conversation. `ask` takes `&mut self`, so a session answers one question at
/// a time; the retriever, embedder and generator may be shared between sessions.
pub struct RagChatbot {
    retriever: Arc<Retriever>,
    embedder: Arc<dyn Embed>,
    generator: Arc<dyn Generator>,
    model: String,
    system_prompt: String,
    top_k: usize,
    history_limit: Option<usize>,
    history: Vec<Turn>,
}

impl RagChatbot {
    pub fn new(
        retriever: Arc<Retriever>,
        embedder: Arc<dyn Embed>,
        generator: Arc<dyn Generator>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            embedder,
            generator,
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            top_k: DEFAULT_TOP_K,
            history_limit: None,
            history: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Caps the history at the most recent `limit` turns; `None` keeps everything.
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn build_prompt(&self, context: &[&Chunk], question: &str) -> Prompt {
        let mut seen = HashSet::new();
        let mut citations = Vec::new();
        let mut context_block = String::from("Provided legal context:\n\n");

        for (i, chunk) in context.iter().enumerate() {
            let label = citation_label(&chunk.metadata);
            context_block.push_str(&format!(
                "--- Context {} ({}) ---\n{}\n\n",
                i + 1,
                label,
                chunk.content
            ));
            if seen.insert(label.clone()) {
                citations.push(label);
            }
        }

        let text = format!(
            "{}\n\nConversation history:\n{}\n\n{}Current question from the user: {}\n",
            self.system_prompt,
            render_history(&self.history),
            context_block,
            question
        );

        Prompt { text, citations }
    }

    /// Answers `question` from the indexed documents. Never fails: any error in
    /// embedding, retrieval or generation yields the fixed apology with no
    /// citations and leaves the history unchanged.
    pub fn ask(&mut self, question: &str) -> Answer {
        let started = Instant::now();
        debug!(
            "Retrieving context for a question of {} chars",
            question.chars().count()
        );

        let query = match self.embedder.embed_query(question) {
            Ok(query) => query,
            Err(err) => {
                error!("Failed to embed question: {err}");
                return Answer::apology();
            }
        };

        let prompt = match self.retriever.retrieve(&query, self.top_k) {
            Ok(context) => {
                debug!("Retrieved {} chunks", context.len());
                self.build_prompt(&context, question)
            }
            Err(err) => {
                error!("Retrieval failed: {err}");
                return Answer::apology();
            }
        };

        let request = GenerationRequest {
            model: self.model.clone(),
            prompt: prompt.text,
            temperature: TEMPERATURE,
        };

        match self.generator.generate(&request) {
            Ok(answer) => {
                self.record(Turn {
                    question: question.to_string(),
                    answer: answer.clone(),
                });
                info!(
                    "Answered with {} citation(s) in {:?}; history has {} turn(s)",
                    prompt.citations.len(),
                    started.elapsed(),
                    self.history.len()
                );
                Answer {
                    answer,
                    citations: prompt.citations.join("; "),
                }
            }
            Err(err) => {
                error!("Generation with model {} failed: {err}", self.model);
                Answer::apology()
            }
        }
    }

    fn record(&mut self, turn: Turn) {
        self.history.push(turn);
        if let Some(limit) = self.history_limit {
            let excess = self.history.len().saturating_sub(limit);
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Page;

    fn chunk(source: &str, page: Page, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            metadata: DocumentMetadata {
                source: source.to_string(),
                page,
            },
        }
    }

    #[test]
    fn labels_render_page_or_placeholder() {
        let paged = chunk("civil_code.pdf", Page::Number(12), "");
        let flat = chunk("notes.txt", Page::NotApplicable, "");
        assert_eq!(citation_label(&paged.metadata), "civil_code.pdf (p. 12)");
        assert_eq!(citation_label(&flat.metadata), "notes.txt (p. N/A)");
    }

    #[test]
    fn empty_history_renders_marker() {
        assert_eq!(render_history(&[]), NO_HISTORY);
        let turns = vec![Turn {
            question: "q1".into(),
            answer: "a1".into(),
        }];
        assert_eq!(render_history(&turns), "User: q1\nAssistant: a1");
    }

    #[test]
    fn system_prompt_quotes_the_refusal() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains(&format!("'{REFUSAL}'")));
        assert!(DEFAULT_SYSTEM_PROMPT.starts_with("You are a professional assistant"));
    }
}
