//! Session-scoped conversation memory.
//!
//! Each session keeps at most `max_turns` recent [`MemoryTurn`]s. Appending
//! past the window evicts the oldest turns first. With `summarize` enabled,
//! evicted turns are folded into a running plain-text summary that the
//! conversational prompt can include; otherwise they are discarded.
//!
//! Implementations must make `append` atomic with respect to `read` on the
//! same session: a reader sees either the old window or the new one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::models::MemoryTurn;
use crate::text::preview;

/// Summary lines retained; older lines are dropped first.
const SUMMARY_MAX_LINES: usize = 20;
const SUMMARY_QUERY_CHARS: usize = 80;
const SUMMARY_RESPONSE_CHARS: usize = 120;

/// Window policy shared by all memory backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWindow {
    pub max_turns: usize,
    pub summarize: bool,
}

impl Default for MemoryWindow {
    fn default() -> Self {
        Self {
            max_turns: 10,
            summarize: false,
        }
    }
}

#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Turns in the window, oldest first.
    async fn read(&self, session: &str) -> Result<Vec<MemoryTurn>>;

    /// Running summary of evicted turns, if any were summarised.
    async fn summary(&self, session: &str) -> Result<Option<String>>;

    async fn append(&self, session: &str, turn: MemoryTurn) -> Result<()>;

    /// Forget everything stored for `session`.
    async fn clear(&self, session: &str) -> Result<()>;
}

/// Fold evicted turns into an existing summary.
///
/// Each turn becomes one `Q: … / A: …` line with both sides truncated.
/// Only the most recent lines are kept.
pub fn fold_into_summary(existing: Option<&str>, evicted: &[MemoryTurn]) -> Option<String> {
    if evicted.is_empty() {
        return existing.map(str::to_string);
    }
    let mut lines: Vec<String> = existing
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default();
    for turn in evicted {
        lines.push(format!(
            "- Q: {} / A: {}",
            preview(&turn.query, SUMMARY_QUERY_CHARS),
            preview(&turn.response, SUMMARY_RESPONSE_CHARS)
        ));
    }
    if lines.len() > SUMMARY_MAX_LINES {
        lines.drain(..lines.len() - SUMMARY_MAX_LINES);
    }
    Some(lines.join("\n"))
}

#[derive(Default)]
struct SessionState {
    turns: VecDeque<MemoryTurn>,
    summary: Option<String>,
}

/// Process-lifetime memory backed by a map of sessions.
pub struct InMemoryConversationMemory {
    window: MemoryWindow,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl InMemoryConversationMemory {
    pub fn new(window: MemoryWindow) -> Self {
        Self {
            window,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationMemory {
    async fn read(&self, session: &str) -> Result<Vec<MemoryTurn>> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(session)
            .map(|s| s.turns.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn summary(&self, session: &str) -> Result<Option<String>> {
        let sessions = self.sessions.read();
        Ok(sessions.get(session).and_then(|s| s.summary.clone()))
    }

    async fn append(&self, session: &str, turn: MemoryTurn) -> Result<()> {
        let mut sessions = self.sessions.write();
        let state = sessions.entry(session.to_string()).or_default();
        state.turns.push_back(turn);

        if state.turns.len() > self.window.max_turns {
            let excess = state.turns.len() - self.window.max_turns;
            let evicted: Vec<MemoryTurn> = state.turns.drain(..excess).collect();
            if self.window.summarize {
                state.summary = fold_into_summary(state.summary.as_deref(), &evicted);
            }
            tracing::debug!(session, evicted = evicted.len(), "memory window full");
        }
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<()> {
        self.sessions.write().remove(session);
        Ok(())
    }
}

/// One conversation: a session key bound to a memory backend.
///
/// The chat pipeline takes sessions by `&mut`, so turns against one
/// session are processed strictly one after another.
pub struct ConversationSession {
    key: String,
    memory: Arc<dyn ConversationMemory>,
}

impl ConversationSession {
    pub fn new(key: impl Into<String>, memory: Arc<dyn ConversationMemory>) -> Self {
        Self {
            key: key.into(),
            memory,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn read(&self) -> Result<Vec<MemoryTurn>> {
        self.memory.read(&self.key).await
    }

    pub async fn summary(&self) -> Result<Option<String>> {
        self.memory.summary(&self.key).await
    }

    pub async fn append(&mut self, turn: MemoryTurn) -> Result<()> {
        self.memory.append(&self.key, turn).await
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.memory.clear(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(max_turns: usize, summarize: bool) -> Arc<InMemoryConversationMemory> {
        Arc::new(InMemoryConversationMemory::new(MemoryWindow {
            max_turns,
            summarize,
        }))
    }

    #[tokio::test]
    async fn test_window_keeps_most_recent_in_order() {
        let mem = memory(3, false);
        for i in 0..7 {
            mem.append("s", MemoryTurn::new(format!("q{}", i), format!("a{}", i)))
                .await
                .unwrap();
        }
        let turns = mem.read("s").await.unwrap();
        let queries: Vec<&str> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["q4", "q5", "q6"]);
        assert!(mem.summary("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evicted_turns_are_summarised() {
        let mem = memory(2, true);
        for i in 0..4 {
            mem.append("s", MemoryTurn::new(format!("question {}", i), "answer"))
                .await
                .unwrap();
        }
        let summary = mem.summary("s").await.unwrap().unwrap();
        assert_eq!(summary.lines().count(), 2);
        assert!(summary.contains("Q: question 0"));
        assert!(summary.contains("Q: question 1"));
        assert!(!summary.contains("question 2"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let mem = memory(5, false);
        mem.append("alice", MemoryTurn::new("hi", "hello")).await.unwrap();
        assert!(mem.read("bob").await.unwrap().is_empty());
        assert_eq!(mem.read("alice").await.unwrap().len(), 1);

        let mut session = ConversationSession::new("alice", mem.clone());
        session.clear().await.unwrap();
        assert!(mem.read("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_readers_never_see_partial_window() {
        let mem = memory(4, true);
        let writer = {
            let mem = mem.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    mem.append("s", MemoryTurn::new(format!("q{}", i), "a"))
                        .await
                        .unwrap();
                }
            })
        };
        for _ in 0..200 {
            let turns = mem.read("s").await.unwrap();
            assert!(turns.len() <= 4);
            for pair in turns.windows(2) {
                let a: usize = pair[0].query[1..].parse().unwrap();
                let b: usize = pair[1].query[1..].parse().unwrap();
                assert_eq!(a + 1, b);
            }
        }
        writer.await.unwrap();
        assert_eq!(mem.read("s").await.unwrap().len(), 4);
    }

    #[test]
    fn test_summary_is_bounded() {
        let turns: Vec<MemoryTurn> = (0..50)
            .map(|i| MemoryTurn::new(format!("q{}", i), "x".repeat(500)))
            .collect();
        let summary = fold_into_summary(None, &turns).unwrap();
        assert_eq!(summary.lines().count(), SUMMARY_MAX_LINES);
        assert!(summary.lines().last().unwrap().contains("q49"));
        assert!(summary.lines().all(|l| l.len() < 250));
    }
}
