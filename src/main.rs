//! # ragdesk CLI
//!
//! Ask questions about a folder of documents with a local language model.
//!
//! ## Usage
//!
//! ```bash
//! ragdesk --config ./config/ragdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragdesk sources` | List ingest files, their formats, and index status |
//! | `ragdesk index` | Build the vector index (or reuse an up-to-date one) |
//! | `ragdesk ask "<question>"` | Answer one question with sources |
//! | `ragdesk chat` | Interactive chat in the terminal |
//! | `ragdesk serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragdesk::app::App;
use ragdesk::{config, embedding, index, logging, repl, server, sources};

/// ragdesk: question answering over local documents.
///
/// The configuration file is optional; without it every setting takes its
/// default. See `config/ragdesk.example.toml`.
#[derive(Parser)]
#[command(name = "ragdesk", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragdesk.toml")]
    config: PathBuf,

    /// Debug-level diagnostics on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files in the ingest directory and the index status.
    Sources,

    /// Build the vector index from the ingest directory.
    ///
    /// Skipped when the stored index is current (see `index.rebuild`).
    Index,

    /// Answer a single question and print the sources used.
    Ask {
        question: String,
    },

    /// Interactive chat. `/clear` resets the history, `/quit` exits.
    Chat,

    /// Serve the HTTP API on `server.bind`.
    Serve {
        /// Override the bind address.
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Index => {
            let embedder = embedding::create_embedder(&cfg).await?;
            let report = index::build_index(&cfg, embedder.as_ref()).await?;
            index::print_report(&cfg, &report);
        }
        Commands::Ask { question } => {
            let app = App::start(cfg).await?;
            repl::run_ask(&app.sessions, &question).await?;
        }
        Commands::Chat => {
            let app = App::start(cfg).await?;
            repl::run_chat(&app.sessions).await?;
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let app = App::start(cfg).await?;
            server::run_server(&bind, app.sessions.clone()).await?;
        }
    }

    Ok(())
}
