//! Core data models that flow through the build and turn pipelines.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of ingested content.
///
/// The identifier is derived from `source`, so rebuilding from an
/// unchanged document set yields the same document (and chunk) ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Source path or URL.
    pub source: String,
    pub text: String,
    /// Free-form metadata, e.g. `title`, `source_type`.
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: document_id_for(&source),
            source,
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Deterministic document id for a source path or URL.
pub fn document_id_for(source: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes()).to_string()
}

/// A bounded-length slice of a [`Document`]'s text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Source of the owning document, carried for display.
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    /// Number of leading characters shared with the previous chunk.
    pub overlap: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk together with its embedding, as persisted in a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

/// Which search list(s) a retrieved candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Vector,
    Lexical,
    Both,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Vector => "vector",
            Provenance::Lexical => "lexical",
            Provenance::Both => "both",
        }
    }
}

/// A chunk scored for one query. Ephemeral: discarded after the turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedCandidate {
    pub chunk: Chunk,
    /// Cosine similarity in vector mode, fused RRF score in hybrid mode.
    pub score: f64,
    pub provenance: Provenance,
    /// 1-based rank in the vector search list, if present there.
    pub vector_rank: Option<usize>,
    /// 1-based rank in the lexical search list, if present there.
    pub lexical_rank: Option<usize>,
    /// Relevance assigned by the re-ranker, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

/// Speaker of a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One `(role, text)` entry of the history handed to a generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

/// One completed exchange in a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTurn {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryTurn {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Flatten turns into the alternating user/assistant history expected by
/// generation providers, oldest first.
pub fn history_messages(turns: &[MemoryTurn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .flat_map(|t| {
            [
                ChatMessage {
                    role: Role::User,
                    text: t.query.clone(),
                },
                ChatMessage {
                    role: Role::Assistant,
                    text: t.response.clone(),
                },
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_stable_per_source() {
        let a = Document::new("docs/a.md", "one");
        let b = Document::new("docs/a.md", "two");
        let c = Document::new("docs/c.md", "one");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_history_messages_alternate() {
        let turns = vec![MemoryTurn::new("q1", "a1"), MemoryTurn::new("q2", "a2")];
        let msgs = history_messages(&turns);
        let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(msgs[3].text, "a2");
    }
}
