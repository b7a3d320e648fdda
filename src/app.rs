//! Startup wiring.
//!
//! Service handles (embedder, chat model, vector index) are constructed once
//! and injected into the chain and session controller. Any failure here is
//! fatal for the command that asked for it.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::chain::{ChainSettings, QaChain};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::index::{build_index, BuildOutcome, VectorIndex};
use crate::llm::{self, ChatModel};
use crate::session::SessionController;

pub struct App {
    pub config: Config,
    pub index: Arc<VectorIndex>,
    pub chain: Arc<QaChain>,
    pub sessions: Arc<SessionController>,
}

impl App {
    /// Wait for the model endpoint, build or reuse the index, and wire the
    /// question-answering services.
    pub async fn start(config: Config) -> Result<Self> {
        let chat = llm::connect(&config.llm)
            .await
            .context("Language model is not available")?;
        let embedder = create_embedder(&config).await?;
        Self::with_services(config, embedder, Arc::new(chat)).await
    }

    /// Same as [`App::start`] with caller-provided model handles.
    pub async fn with_services(
        config: Config,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let report = build_index(&config, embedder.as_ref())
            .await
            .context("Failed to build the document index")?;
        match report.outcome {
            BuildOutcome::Built => tracing::info!(
                files = report.files,
                chunks = report.chunks,
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "index built"
            ),
            BuildOutcome::Reused => {
                tracing::info!(chunks = report.chunks, "reusing existing index")
            }
        }

        let index = Arc::new(VectorIndex::open(&config, embedder).await?);
        let chain = Arc::new(QaChain::new(
            index.clone(),
            chat,
            ChainSettings::from_config(&config),
        ));
        let sessions = Arc::new(SessionController::new(
            chain.clone(),
            config.generation.snippet_lines,
        ));

        Ok(Self {
            config,
            index,
            chain,
            sessions,
        })
    }
}
