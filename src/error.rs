//! Typed errors for the query path.
//!
//! Startup and index construction use `anyhow` and abort on failure. Errors
//! raised while answering a single question are [`QaError`]s instead, so the
//! session layer can render them by kind without parsing message text.

use serde::Serialize;
use thiserror::Error;

/// Category of a query-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QaErrorKind {
    /// The question was empty or otherwise unusable.
    InvalidQuestion,
    /// Embedding the query or searching the index failed.
    Retrieval,
    /// The language model call failed or returned an unusable response.
    Generation,
}

impl QaErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaErrorKind::InvalidQuestion => "invalid_question",
            QaErrorKind::Retrieval => "retrieval",
            QaErrorKind::Generation => "generation",
        }
    }
}

impl std::fmt::Display for QaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct QaError {
    pub kind: QaErrorKind,
    pub message: String,
}

impl QaError {
    pub fn new(kind: QaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_question(message: impl Into<String>) -> Self {
        Self::new(QaErrorKind::InvalidQuestion, message)
    }

    /// Wrap an `anyhow` chain as a retrieval failure, keeping every cause.
    pub fn retrieval(err: anyhow::Error) -> Self {
        Self::new(QaErrorKind::Retrieval, format!("{:#}", err))
    }

    pub fn generation(err: anyhow::Error) -> Self {
        Self::new(QaErrorKind::Generation, format!("{:#}", err))
    }
}
