//! # ragchat CLI
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and run schema migrations |
//! | `ragchat build` | Load documents and build the index |
//! | `ragchat chat` | Interactive chat session |
//! | `ragchat ask "<question>"` | Answer a single question |
//! | `ragchat search "<query>"` | Retrieve ranked chunks without generating |
//! | `ragchat history` | Show a session's remembered turns |

use clap::{Parser, Subcommand};
use ragchat::logging::LogFormat;
use ragchat::{chat, config, ingest, logging, migrate, search};
use ragchat_core::retrieve::RetrievalMode;
use std::path::PathBuf;

/// ragchat: chat with your documents through any embedding and
/// generation provider.
#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "Retrieval-augmented chat over local documents and web pages",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Load documents, chunk and embed them, and publish the index.
    ///
    /// Skipped when an index already exists unless `--force` is given.
    Build {
        /// Rebuild even if an index exists.
        #[arg(long)]
        force: bool,
    },

    /// Start an interactive chat session (`exit` or `quit` to leave).
    Chat {
        /// Conversation session id.
        #[arg(long, default_value = chat::DEFAULT_SESSION)]
        session: String,

        /// Rebuild the index before chatting.
        #[arg(long)]
        setup: bool,
    },

    /// Answer one question and exit.
    Ask {
        question: String,

        #[arg(long, default_value = chat::DEFAULT_SESSION)]
        session: String,
    },

    /// Retrieve ranked chunks for a query without generating an answer.
    Search {
        query: String,

        /// `vector` or `hybrid`; defaults to `retrieval.mode`.
        #[arg(long)]
        mode: Option<RetrievalMode>,

        /// Maximum number of results; defaults to `retrieval.top_k`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the remembered turns (and summary) of a session.
    History {
        #[arg(long, default_value = chat::DEFAULT_SESSION)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);
    let _ = dotenvy::dotenv();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Build { force } => {
            ingest::run_build(&cfg, force).await?;
        }
        Commands::Chat { session, setup } => {
            chat::run_chat(&cfg, &session, setup).await?;
        }
        Commands::Ask { question, session } => {
            chat::run_ask(&cfg, &question, &session).await?;
        }
        Commands::Search { query, mode, limit } => {
            search::run_search(&cfg, &query, mode, limit).await?;
        }
        Commands::History { session } => {
            chat::run_history(&cfg, &session).await?;
        }
    }

    Ok(())
}
