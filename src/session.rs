//! Conversation sessions.
//!
//! Each session is an ordered list of turns. Asking a question is two-phase:
//! a `Pending` turn is appended and announced on the caller's [`TurnSink`]
//! right away, then replaced by the answer (or the failure) once the chain
//! returns. Chain errors are recorded on the turn and never escape `ask`.
//!
//! The session map lock is held only to look up a session, and a session's
//! own lock only to read or write its turns, never across the model call.
//! Sessions therefore never block each other.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::chain::QaChain;
use crate::error::QaErrorKind;
use crate::models::RetrievedChunk;

pub type SessionId = String;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnState {
    Pending,
    Answered {
        answer: String,
        /// Source snippets, rendered for display.
        sources: String,
    },
    Failed {
        kind: QaErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub question: String,
    #[serde(flatten)]
    pub state: TurnState,
}

impl Turn {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, TurnState::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    Pending { index: usize, question: String },
    Completed { index: usize, turn: Turn },
}

/// Receives turn lifecycle events as they happen.
pub trait TurnSink: Send + Sync {
    fn send(&self, event: TurnEvent);
}

impl TurnSink for mpsc::UnboundedSender<TurnEvent> {
    fn send(&self, event: TurnEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = mpsc::UnboundedSender::send(self, event);
    }
}

/// Discards every event.
pub struct NoopSink;

impl TurnSink for NoopSink {
    fn send(&self, _event: TurnEvent) {}
}

#[derive(Debug, Default)]
struct Session {
    turns: Vec<Turn>,
    /// Bumped on clear; turns started under an older epoch are discarded.
    epoch: u64,
}

pub struct SessionController {
    chain: Arc<QaChain>,
    snippet_lines: usize,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionController {
    pub fn new(chain: Arc<QaChain>, snippet_lines: usize) -> Self {
        Self {
            chain,
            snippet_lines,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_session(&self) -> SessionId {
        let id = Uuid::new_v4().to_string();
        self.insert(id.clone());
        tracing::debug!(session = %id, "session created");
        id
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn insert(&self, id: SessionId) -> Arc<Mutex<Session>> {
        let mut map = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        map.entry(id).or_default().clone()
    }

    fn get(&self, id: &str) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Ask within an existing session.
    pub async fn ask(
        &self,
        id: &str,
        question: &str,
        sink: &dyn TurnSink,
    ) -> Result<Turn, SessionError> {
        let session = self.get(id)?;
        Ok(self.run_turn(id, session, question, sink).await)
    }

    /// Ask within `id`, creating the session first if it does not exist.
    pub async fn ask_or_create(&self, id: &str, question: &str, sink: &dyn TurnSink) -> Turn {
        let session = self.insert(id.to_string());
        self.run_turn(id, session, question, sink).await
    }

    async fn run_turn(
        &self,
        id: &str,
        session: Arc<Mutex<Session>>,
        question: &str,
        sink: &dyn TurnSink,
    ) -> Turn {
        let (index, epoch) = {
            let mut s = session.lock().await;
            s.turns.push(Turn {
                question: question.to_string(),
                state: TurnState::Pending,
            });
            (s.turns.len() - 1, s.epoch)
        };
        sink.send(TurnEvent::Pending {
            index,
            question: question.to_string(),
        });

        let state = match self.chain.answer(question).await {
            Ok(answer) => TurnState::Answered {
                sources: render_sources(&answer.sources, self.snippet_lines),
                answer: answer.text,
            },
            Err(err) => {
                tracing::warn!(session = %id, kind = %err.kind, error = %err.message, "turn failed");
                TurnState::Failed {
                    kind: err.kind,
                    message: err.message,
                }
            }
        };
        let turn = Turn {
            question: question.to_string(),
            state,
        };

        {
            let mut s = session.lock().await;
            if s.epoch == epoch && index < s.turns.len() {
                s.turns[index] = turn.clone();
            } else {
                tracing::debug!(session = %id, "session cleared during turn, result discarded");
            }
        }
        sink.send(TurnEvent::Completed {
            index,
            turn: turn.clone(),
        });
        turn
    }

    pub async fn transcript(&self, id: &str) -> Result<Vec<Turn>, SessionError> {
        let session = self.get(id)?;
        let s = session.lock().await;
        Ok(s.turns.clone())
    }

    /// Empty the history. Turns still in flight will not write into it.
    pub async fn clear(&self, id: &str) -> Result<(), SessionError> {
        let session = self.get(id)?;
        let mut s = session.lock().await;
        s.turns.clear();
        s.epoch += 1;
        tracing::debug!(session = %id, "session cleared");
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<(), SessionError> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }
}

/// First `lines` lines of each chunk, prefixed with its source label,
/// separated by `---` lines.
pub fn render_sources(chunks: &[RetrievedChunk], lines: usize) -> String {
    chunks
        .iter()
        .map(|c| {
            let snippet: Vec<&str> = c.text.lines().take(lines).collect();
            format!("{}: {}", c.label(), snippet.join("\n"))
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}
