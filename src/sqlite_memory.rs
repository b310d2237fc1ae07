//! Conversation memory persisted in the index database.
//!
//! Turns live in `conversation_turns`, one row per exchange, ordered by
//! rowid. Eviction and summary folding happen inside the append
//! transaction, so a concurrent reader sees the window either before or
//! after the append.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use ragchat_core::memory::{fold_into_summary, ConversationMemory, MemoryWindow};
use ragchat_core::models::MemoryTurn;

pub struct SqliteConversationMemory {
    pool: SqlitePool,
    window: MemoryWindow,
}

impl SqliteConversationMemory {
    pub fn new(pool: SqlitePool, window: MemoryWindow) -> Self {
        Self { pool, window }
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[async_trait]
impl ConversationMemory for SqliteConversationMemory {
    async fn read(&self, session: &str) -> Result<Vec<MemoryTurn>> {
        let rows = sqlx::query(
            "SELECT query, response, created_at FROM conversation_turns WHERE session = ? ORDER BY id ASC",
        )
        .bind(session)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                MemoryTurn {
                    query: row.get("query"),
                    response: row.get("response"),
                    timestamp: parse_ts(&created_at),
                }
            })
            .collect())
    }

    async fn summary(&self, session: &str) -> Result<Option<String>> {
        let summary: Option<String> =
            sqlx::query_scalar("SELECT summary FROM conversation_summaries WHERE session = ?")
                .bind(session)
                .fetch_optional(&self.pool)
                .await?;
        Ok(summary)
    }

    async fn append(&self, session: &str, turn: MemoryTurn) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversation_turns (session, query, response, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session)
        .bind(&turn.query)
        .bind(&turn.response)
        .bind(turn.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_turns WHERE session = ?")
            .bind(session)
            .fetch_one(&mut *tx)
            .await?;
        let excess = count - self.window.max_turns as i64;

        if excess > 0 {
            let rows = sqlx::query(
                "SELECT id, query, response, created_at FROM conversation_turns
                 WHERE session = ? ORDER BY id ASC LIMIT ?",
            )
            .bind(session)
            .bind(excess)
            .fetch_all(&mut *tx)
            .await?;

            let mut evicted = Vec::with_capacity(rows.len());
            for row in &rows {
                let id: i64 = row.get("id");
                let created_at: String = row.get("created_at");
                evicted.push(MemoryTurn {
                    query: row.get("query"),
                    response: row.get("response"),
                    timestamp: parse_ts(&created_at),
                });
                sqlx::query("DELETE FROM conversation_turns WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }

            if self.window.summarize {
                let existing: Option<String> = sqlx::query_scalar(
                    "SELECT summary FROM conversation_summaries WHERE session = ?",
                )
                .bind(session)
                .fetch_optional(&mut *tx)
                .await?;

                if let Some(summary) = fold_into_summary(existing.as_deref(), &evicted) {
                    sqlx::query(
                        "INSERT INTO conversation_summaries (session, summary) VALUES (?, ?)
                         ON CONFLICT(session) DO UPDATE SET summary = excluded.summary",
                    )
                    .bind(session)
                    .bind(&summary)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            tracing::debug!(session, evicted = evicted.len(), "memory window full");
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM conversation_turns WHERE session = ?")
            .bind(session)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversation_summaries WHERE session = ?")
            .bind(session)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
