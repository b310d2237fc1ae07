//! The `build` command: load documents and publish a fresh index.
//!
//! A build never touches the live database while it runs. It writes into
//! `<index.path>.building`, then renames that file over `<index.path>`
//! once every document has been processed. A chat session that already
//! has the old file open keeps reading it until it reconnects.
//!
//! Persisted conversation memory is copied from the previous index into
//! the new one before the swap.
//!
//! Builds assume no other process is writing the index. A `chat` or `ask`
//! with `memory.persist = true` that appends turns while a build runs
//! writes them into the old file; turns committed after the carry-over
//! land in the unlinked file and are lost. The old `-wal`/`-shm` sidecars
//! are removed before the rename, which is only safe once the previous
//! index has been checkpointed with no other connection open. The build
//! checkpoints first and warns when another session still holds the file.
//! Run `build` while no persisted chat is active.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use ragchat_core::pipeline::{BuildOptions, BuildReport, IndexBuilder};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::loader::load_documents;
use crate::sqlite_store::SqliteIndex;
use crate::{db, migrate};

/// Whether a built index with at least one vector exists at the
/// configured path. A schema created by `ragchat init` alone does not count.
pub async fn index_exists(config: &Config) -> Result<bool> {
    let path = config.index_path();
    if !path.is_file() {
        return Ok(false);
    }
    let pool = db::connect(path).await?;
    let count: std::result::Result<i64, sqlx::Error> =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&pool)
            .await;
    pool.close().await;
    Ok(matches!(count, Ok(n) if n > 0))
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_db_files(path: &Path) -> Result<()> {
    for p in [
        path.to_path_buf(),
        sidecar(path, "-wal"),
        sidecar(path, "-shm"),
    ] {
        if p.exists() {
            std::fs::remove_file(&p)?;
        }
    }
    Ok(())
}

/// Fold the WAL of the previous index back into its main file.
///
/// Returns `false` when another connection kept the checkpoint from
/// completing.
async fn checkpoint_previous(path: &Path) -> Result<bool> {
    let pool = db::connect(path).await?;
    let (busy, _log, _checkpointed): (i64, i64, i64) =
        sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
            .fetch_one(&pool)
            .await?;
    pool.close().await;
    Ok(busy == 0)
}

/// Copy persisted conversation turns and summaries from `old` into `pool`.
async fn carry_over_memory(pool: &SqlitePool, old: &Path) -> Result<usize> {
    let mut conn = pool.acquire().await?;
    sqlx::query("ATTACH DATABASE ? AS previous")
        .bind(old.to_string_lossy().to_string())
        .execute(&mut *conn)
        .await?;

    let has_turns: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM previous.sqlite_master WHERE type='table' AND name='conversation_turns'",
    )
    .fetch_one(&mut *conn)
    .await?;

    let mut copied = 0;
    if has_turns {
        copied = sqlx::query(
            "INSERT INTO conversation_turns (session, query, response, created_at)
             SELECT session, query, response, created_at FROM previous.conversation_turns ORDER BY id",
        )
        .execute(&mut *conn)
        .await?
        .rows_affected() as usize;
        sqlx::query(
            "INSERT OR REPLACE INTO conversation_summaries (session, summary)
             SELECT session, summary FROM previous.conversation_summaries",
        )
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("DETACH DATABASE previous").execute(&mut *conn).await?;
    Ok(copied)
}

/// Build into `<path>.building` and swap it into place.
///
/// Returns the build report. Nothing is published if no document could be
/// indexed.
pub async fn build_index(config: &Config) -> Result<BuildReport> {
    let loaded = load_documents(&config.loader).await?;
    let embedder = create_embedder(&config.embedding)?;

    let final_path = config.index_path();
    let building = sidecar(final_path, ".building");
    remove_db_files(&building)?;

    let pool = db::connect(&building).await?;
    migrate::apply(&pool).await?;

    let index = Arc::new(SqliteIndex::new(pool.clone(), embedder.dims()));
    index
        .ensure_embedding(embedder.model_name(), embedder.dims())
        .await?;

    let builder = IndexBuilder::new(
        embedder,
        index.clone(),
        BuildOptions {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            batch_size: config.embedding.batch_size,
            workers: config.embedding.workers,
        },
    )?
    // Filled whatever retrieval.mode says, so `search --mode hybrid` always works.
    .with_lexical(index.clone());

    let mut report = builder.build(loaded.documents).await;
    let mut failures = loaded.failures;
    failures.append(&mut report.failures);
    report.failures = failures;

    if report.documents_indexed == 0 {
        pool.close().await;
        remove_db_files(&building)?;
        bail!(
            "build indexed no documents ({} failed, {} empty); keeping the existing index",
            report.failures.len(),
            report.documents_empty
        );
    }

    if final_path.is_file() {
        if !checkpoint_previous(final_path).await? {
            tracing::warn!(
                path = %final_path.display(),
                "index is open in another session; turns it persists from now on are not carried over"
            );
        }
        let copied = carry_over_memory(&pool, final_path).await?;
        if copied > 0 {
            tracing::debug!(turns = copied, "carried over conversation memory");
        }
    }

    pool.close().await;
    // A leftover WAL next to the old file must not be applied to the new one.
    for stale in [sidecar(final_path, "-wal"), sidecar(final_path, "-shm")] {
        if stale.exists() {
            std::fs::remove_file(&stale)?;
        }
    }
    std::fs::rename(&building, final_path)?;

    tracing::info!(
        path = %final_path.display(),
        documents = report.documents_indexed,
        chunks = report.chunks_indexed,
        "published index"
    );
    Ok(report)
}

/// Entry point for `ragchat build`.
pub async fn run_build(config: &Config, force: bool) -> Result<()> {
    if !force && index_exists(config).await? {
        println!(
            "Index already exists at {} (use --force to rebuild).",
            config.index_path().display()
        );
        return Ok(());
    }

    let report = build_index(config).await?;
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &BuildReport) {
    println!("build");
    println!("  documents indexed: {}", report.documents_indexed);
    println!("  chunks indexed: {}", report.chunks_indexed);
    if report.documents_empty > 0 {
        println!("  empty documents: {}", report.documents_empty);
    }
    if !report.failures.is_empty() {
        println!("  skipped: {}", report.failures.len());
        for failure in &report.failures {
            println!("    {}", failure);
        }
    }
    println!("ok");
}
