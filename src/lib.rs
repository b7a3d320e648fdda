//! # ragdesk
//!
//! Question answering over a local folder of documents, grounded in
//! retrieved passages and answered by a local language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │  documents/ │──▶│ Load, chunk │──▶│  SQLite  │
//! │ pdf csv md  │   │   + embed   │   │  vectors │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │ MMR retrieval
//!                                          ▼
//!                   ┌──────────┐     ┌──────────┐
//!                   │ Sessions │◀────│ QA chain │──▶ LLM
//!                   └────┬─────┘     └──────────┘
//!                  ┌─────┴─────┐
//!                  ▼           ▼
//!             ┌────────┐  ┌────────┐
//!             │  CLI   │  │  HTTP  │
//!             └────────┘  └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragdesk sources               # what will be indexed
//! ragdesk index                 # build the index
//! ragdesk ask "What is the refund policy?"
//! ragdesk chat                  # interactive
//! ragdesk serve                 # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | Ingest directory scanning and document loading |
//! | [`extract`] | Per-format text extraction |
//! | [`chunk`] | Recursive text splitting |
//! | [`embedding`] | Embedding backends and vector utilities |
//! | [`index`] | Persistent vector index and retrieval |
//! | [`mmr`] | Maximal marginal relevance re-ranking |
//! | [`fingerprint`] | Content fingerprint for rebuild decisions |
//! | [`llm`] | Chat model client |
//! | [`chain`] | Retrieval-augmented answer generation |
//! | [`session`] | Conversation sessions |
//! | [`server`] | HTTP API |

pub mod app;
pub mod chain;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod index;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod mmr;
pub mod models;
pub mod repl;
pub mod server;
pub mod session;
pub mod sources;
