//! Terminal front end: one-shot `ask` and the interactive `chat` loop.
//!
//! Answers go to stdout; the pending notice goes to stderr so piping an
//! answer somewhere stays clean.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::session::{SessionController, TurnEvent, TurnSink, TurnState};

/// Prints turn events as they arrive.
struct TerminalSink;

impl TurnSink for TerminalSink {
    fn send(&self, event: TurnEvent) {
        match event {
            TurnEvent::Pending { .. } => {
                eprintln!("thinking...");
            }
            TurnEvent::Completed { turn, .. } => {
                println!("{}", format_turn(&turn.state));
            }
        }
    }
}

pub fn format_turn(state: &TurnState) -> String {
    match state {
        TurnState::Pending => "(pending)".to_string(),
        TurnState::Answered { answer, sources } if sources.is_empty() => answer.clone(),
        TurnState::Answered { answer, sources } => {
            format!("{}\n\nSources:\n{}", answer, sources)
        }
        TurnState::Failed { kind, message } => format!("error ({}): {}", kind, message),
    }
}

/// Answer a single question and exit.
pub async fn run_ask(sessions: &SessionController, question: &str) -> Result<()> {
    let id = sessions.create_session();
    let turn = sessions.ask(&id, question, &TerminalSink).await?;
    if let TurnState::Failed { kind, message } = turn.state {
        anyhow::bail!("{} error: {}", kind, message);
    }
    Ok(())
}

/// Read questions from stdin until EOF or `/quit`.
pub async fn run_chat(sessions: &SessionController) -> Result<()> {
    let id = sessions.create_session();
    println!("Ask a question about your documents. /clear resets the chat, /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                sessions.clear(&id).await?;
                println!("Chat cleared.");
            }
            question => {
                sessions.ask(&id, question, &TerminalSink).await?;
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QaErrorKind;

    #[test]
    fn formats_each_state() {
        let answered = TurnState::Answered {
            answer: "42".into(),
            sources: "a.md: x".into(),
        };
        assert_eq!(format_turn(&answered), "42\n\nSources:\na.md: x");

        let bare = TurnState::Answered {
            answer: "no idea".into(),
            sources: String::new(),
        };
        assert_eq!(format_turn(&bare), "no idea");

        let failed = TurnState::Failed {
            kind: QaErrorKind::Generation,
            message: "timeout".into(),
        };
        assert_eq!(format_turn(&failed), "error (generation): timeout");
    }
}
