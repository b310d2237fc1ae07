//! The `chat`, `ask`, and `history` commands.
//!
//! [`ChatContext::open`] wires the configured providers, the SQLite index,
//! and the memory backend into a core [`ChatPipeline`]. The interactive
//! loop reads one query per line from stdin until `exit`, `quit`, or EOF.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use ragchat_core::generation::{DisabledGenerator, GenerationProvider};
use ragchat_core::memory::{
    ConversationMemory, ConversationSession, InMemoryConversationMemory, MemoryWindow,
};
use ragchat_core::pipeline::{ChatPipeline, TurnOptions, TurnOutcome};
use ragchat_core::prompt::PromptTemplate;
use ragchat_core::retrieve::{Retriever, RetrieverParams};
use ragchat_core::RagError;
use sqlx::SqlitePool;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::ingest::{build_index, index_exists, print_report};
use crate::rerank::create_reranker;
use crate::sqlite_memory::SqliteConversationMemory;
use crate::sqlite_store::SqliteIndex;
use crate::{db, migrate};

/// Session id used when `--session` is not given.
pub const DEFAULT_SESSION: &str = "cli";

const NO_KNOWLEDGE: &str = "No knowledge available — run `ragchat build` first.";

/// Everything a turn needs, opened against the published index.
pub struct ChatContext {
    pub pipeline: ChatPipeline,
    pub memory: Arc<dyn ConversationMemory>,
    pool: SqlitePool,
}

fn load_template(path: Option<&Path>, fallback: PromptTemplate) -> Result<PromptTemplate> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read prompt template: {}", p.display()))?;
            Ok(PromptTemplate::new(text)?)
        }
        None => Ok(fallback),
    }
}

/// Pick the standard or conversational template depending on memory.
pub fn select_template(config: &Config) -> Result<PromptTemplate> {
    if config.memory.enabled {
        load_template(
            config.prompt.chat_template_path.as_deref(),
            PromptTemplate::conversational(),
        )
    } else {
        load_template(config.prompt.template_path.as_deref(), PromptTemplate::standard())
    }
}

pub fn turn_options(config: &Config) -> TurnOptions {
    TurnOptions {
        top_k: config.retrieval.top_k,
        mode: config.retrieval.mode,
        rerank_top_n: if config.reranker.enabled {
            config.reranker.top_n
        } else {
            config.retrieval.top_k
        },
        context_budget: config.prompt.context_budget,
        use_memory: config.memory.enabled,
    }
}

impl ChatContext {
    /// Open the published index. With `generate == false` the generation
    /// provider is not constructed, so retrieval-only commands need no
    /// generation credentials.
    ///
    /// # Errors
    ///
    /// [`RagError::IndexEmpty`] when no index has been built yet.
    pub async fn open(config: &Config, generate: bool) -> Result<Self> {
        if !index_exists(config).await? {
            return Err(RagError::IndexEmpty.into());
        }

        let pool = db::connect(config.index_path()).await?;
        migrate::apply(&pool).await?;

        let embedder = create_embedder(&config.embedding)?;
        let index = Arc::new(SqliteIndex::new(pool.clone(), embedder.dims()));
        index
            .ensure_embedding(embedder.model_name(), embedder.dims())
            .await?;

        let retriever = Retriever::new(
            embedder,
            index.clone(),
            RetrieverParams {
                candidate_k: config.retrieval.candidate_k,
                rrf_k: config.retrieval.rrf_k,
                weights: config.fusion_weights(),
            },
        )
        .with_lexical(index);

        let generator: Arc<dyn GenerationProvider> = if generate {
            create_generator(&config.generation)?
        } else {
            Arc::new(DisabledGenerator)
        };

        let mut pipeline = ChatPipeline::new(
            retriever,
            generator,
            select_template(config)?,
            turn_options(config),
        )?;
        if let Some(reranker) = create_reranker(&config.reranker)? {
            pipeline = pipeline.with_reranker(reranker);
        }

        let memory = open_memory(config, &pool);
        Ok(Self {
            pipeline,
            memory,
            pool,
        })
    }

    pub fn session(&self, key: &str) -> ConversationSession {
        ConversationSession::new(key, self.memory.clone())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn open_memory(config: &Config, pool: &SqlitePool) -> Arc<dyn ConversationMemory> {
    let window = MemoryWindow {
        max_turns: config.memory.window,
        summarize: config.memory.summarize,
    };
    if config.memory.persist {
        Arc::new(SqliteConversationMemory::new(pool.clone(), window))
    } else {
        Arc::new(InMemoryConversationMemory::new(window))
    }
}

/// Replace core errors that have a user-facing explanation.
pub fn explain(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<RagError>() {
        Some(RagError::IndexEmpty) => anyhow::anyhow!(NO_KNOWLEDGE),
        _ => err,
    }
}

pub fn print_outcome(outcome: &TurnOutcome) {
    println!("{}", outcome.answer.trim());
    if outcome.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, source) in outcome.sources.iter().enumerate() {
        println!(
            "  [{}] {} (chunk {})",
            i + 1,
            source.chunk.source,
            source.chunk.chunk_index
        );
    }
}

async fn timed_turn(
    ctx: &ChatContext,
    session: &mut ConversationSession,
    query: &str,
) -> Result<TurnOutcome, RagError> {
    let started = Instant::now();
    let outcome = ctx.pipeline.turn(session, query).await;
    tracing::debug!(
        session = session.key(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        ok = outcome.is_ok(),
        "turn finished"
    );
    outcome
}

/// Entry point for `ragchat chat`.
pub async fn run_chat(config: &Config, session_id: &str, setup: bool) -> Result<()> {
    if setup || !index_exists(config).await? {
        let report = build_index(config).await?;
        print_report(&report);
    }

    let ctx = ChatContext::open(config, true).await.map_err(explain)?;
    let mut session = ctx.session(session_id);

    println!(
        "ragchat: session '{}', {} retrieval. Type `exit` or `quit` to leave.",
        session_id, config.retrieval.mode
    );

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            break;
        }

        match timed_turn(&ctx, &mut session, query).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(RagError::IndexEmpty) => println!("{}", NO_KNOWLEDGE),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    ctx.close().await;
    Ok(())
}

/// Entry point for `ragchat ask`.
pub async fn run_ask(config: &Config, question: &str, session_id: &str) -> Result<()> {
    let ctx = ChatContext::open(config, true).await.map_err(explain)?;
    let mut session = ctx.session(session_id);

    let result = timed_turn(&ctx, &mut session, question).await;
    ctx.close().await;

    let outcome = result.map_err(|e| explain(e.into()))?;
    print_outcome(&outcome);
    Ok(())
}

/// Entry point for `ragchat history`.
pub async fn run_history(config: &Config, session_id: &str) -> Result<()> {
    if !config.memory.persist {
        println!("Conversation memory is not persisted (set [memory] persist = true).");
        return Ok(());
    }

    let ctx = ChatContext::open(config, false).await.map_err(explain)?;
    let session = ctx.session(session_id);
    let summary = session.summary().await?;
    let turns = session.read().await?;

    if let Some(summary) = summary {
        println!("Earlier conversation (summary):");
        println!("{}", summary);
        println!();
    }
    if turns.is_empty() {
        println!("No turns in session '{}'.", session_id);
    }
    for (i, turn) in turns.iter().enumerate() {
        println!("{}. [{}]", i + 1, turn.timestamp.format("%Y-%m-%d %H:%M:%S"));
        println!("    Q: {}", turn.query);
        println!("    A: {}", turn.response.trim());
    }

    ctx.close().await;
    Ok(())
}
