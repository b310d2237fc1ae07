//! Prompt templates and budgeted prompt assembly.
//!
//! A template is plain text with `{context}` and `{question}` placeholders
//! and an optional `{summary}` placeholder for the running memory summary.
//! Recent memory turns are not rendered into the template; they travel
//! alongside the prompt as chat history.
//!
//! # Budget
//!
//! The budget counts characters of the rendered prompt plus all history
//! text. When over budget, assembly sheds content in this order:
//!
//! 1. candidates from the end of the list (lowest score first), keeping one,
//! 2. the oldest history turns,
//! 3. the last remaining candidate.
//!
//! If the bare template and question still exceed the budget, the prompt
//! is returned anyway and a warning is logged.

use crate::error::{RagError, Result};
use crate::models::{history_messages, ChatMessage, MemoryTurn, RetrievedCandidate};

pub const DEFAULT_TEMPLATE: &str = "\
Answer the question using only the context below. If the context does not \
contain the answer, say that you don't know.

Context:
{context}

Question: {question}

Answer:";

pub const DEFAULT_CHAT_TEMPLATE: &str = "\
You are an assistant answering questions about the user's documents. Use the \
context below and the conversation so far. If the context does not contain \
the answer, say that you don't know.

Earlier conversation (summary):
{summary}

Context:
{context}

Question: {question}";

const NO_CONTEXT: &str = "(no relevant context found)";
const NO_SUMMARY: &str = "(none)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    /// Validate and wrap a template.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidConfig`] if `{context}` or `{question}` is missing.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        for placeholder in ["{context}", "{question}"] {
            if !text.contains(placeholder) {
                return Err(RagError::InvalidConfig(format!(
                    "prompt template is missing the {} placeholder",
                    placeholder
                )));
            }
        }
        Ok(Self { text })
    }

    pub fn standard() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }

    pub fn conversational() -> Self {
        Self {
            text: DEFAULT_CHAT_TEMPLATE.to_string(),
        }
    }

    /// Fill the placeholders in one left-to-right pass over the template.
    /// Substituted text is copied verbatim and never scanned again, so a
    /// chunk or summary containing `{question}` stays literal.
    pub fn render(&self, context: &str, question: &str, summary: Option<&str>) -> String {
        let mut out = String::with_capacity(self.text.len() + context.len() + question.len());
        let mut rest = self.text.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let filled = [
                ("{context}", context),
                ("{question}", question),
                ("{summary}", summary.unwrap_or(NO_SUMMARY)),
            ]
            .into_iter()
            .find(|(placeholder, _)| tail.starts_with(placeholder));
            match filled {
                Some((placeholder, value)) => {
                    out.push_str(value);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Number each candidate and join them into the `{context}` block.
pub fn format_context(candidates: &[RetrievedCandidate]) -> String {
    if candidates.is_empty() {
        return NO_CONTEXT.to_string();
    }
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}\n{}", i + 1, c.chunk.source, c.chunk.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    pub history: Vec<ChatMessage>,
    /// Candidates rendered into the prompt, in order.
    pub used: Vec<RetrievedCandidate>,
    pub dropped_candidates: usize,
    pub dropped_turns: usize,
}

impl AssembledPrompt {
    pub fn size(&self) -> usize {
        self.text.chars().count() + self.history.iter().map(|m| m.text.chars().count()).sum::<usize>()
    }
}

/// Render `template` within `budget` characters, shedding content as needed.
pub fn assemble(
    template: &PromptTemplate,
    question: &str,
    candidates: Vec<RetrievedCandidate>,
    turns: &[MemoryTurn],
    summary: Option<&str>,
    budget: usize,
) -> AssembledPrompt {
    let total_candidates = candidates.len();
    let mut used = candidates;
    let mut first_turn = 0;

    loop {
        let prompt = AssembledPrompt {
            text: template.render(&format_context(&used), question, summary),
            history: history_messages(&turns[first_turn..]),
            used: Vec::new(),
            dropped_candidates: total_candidates - used.len(),
            dropped_turns: first_turn,
        };
        let size = prompt.size();
        if size <= budget {
            return AssembledPrompt { used, ..prompt };
        }

        if used.len() > 1 {
            used.pop();
        } else if first_turn < turns.len() {
            first_turn += 1;
        } else if !used.is_empty() {
            used.pop();
        } else {
            tracing::warn!(size, budget, "prompt exceeds context budget with no context left to drop");
            return AssembledPrompt { used, ..prompt };
        }
    }
}
