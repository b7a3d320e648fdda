//! In-process stand-in for an Ollama server.
//!
//! - `POST /api/embed`: bag-of-words vectors (each lowercase word hashed into
//!   one of 64 buckets), so texts sharing words are similar.
//! - `POST /api/chat`: answers from the prompt's context when a content word
//!   of the question appears in it, otherwise replies with the fallback
//!   phrase the prompt asks for. A question containing `explode` gets a 500.
//! - `GET /api/tags`: lists `llama3.2:latest`.

#![allow(dead_code)]

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const DIMS: usize = 64;
const STOPWORDS: &[&str] = &["which", "about", "where", "there", "their", "would", "could"];

#[derive(Default)]
pub struct Counters {
    pub embed_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
}

pub struct FakeOllama {
    pub url: String,
    pub counters: Arc<Counters>,
}

impl FakeOllama {
    pub fn embed_calls(&self) -> usize {
        self.counters.embed_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.counters.chat_calls.load(Ordering::SeqCst)
    }
}

pub async fn spawn_fake_ollama() -> FakeOllama {
    let counters = Arc::new(Counters::default());
    let app = Router::new()
        .route("/api/tags", get(tags))
        .route("/api/embed", post(embed))
        .route("/api/chat", post(chat))
        .with_state(counters.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeOllama {
        url: format!("http://{}", addr),
        counters,
    }
}

pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in words(text) {
        // FNV-1a
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    v
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    text.split_once(start)
        .map(|(_, rest)| rest.split(end).next().unwrap_or(rest))
        .unwrap_or("")
}

async fn tags() -> Json<Value> {
    Json(json!({ "models": [{ "name": "llama3.2:latest" }, { "name": "nomic-embed-text:latest" }] }))
}

async fn embed(State(counters): State<Arc<Counters>>, Json(body): Json<Value>) -> Json<Value> {
    counters.embed_calls.fetch_add(1, Ordering::SeqCst);
    let inputs: Vec<String> = match &body["input"] {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|i| i.as_str().unwrap_or_default().to_string())
            .collect(),
        _ => Vec::new(),
    };
    let embeddings: Vec<Vec<f32>> = inputs.iter().map(|t| embed_text(t)).collect();
    Json(json!({ "model": body["model"], "embeddings": embeddings }))
}

async fn chat(
    State(counters): State<Arc<Counters>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    counters.chat_calls.fetch_add(1, Ordering::SeqCst);
    let prompt = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();

    let fallback = between(prompt, "reply with exactly:\n", "\n");
    let context = between(prompt, "Context:\n", "\n\nQuestion: ");
    let question = between(prompt, "Question: ", "\n\nAnswer:");

    if question.contains("explode") {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "model crashed".to_string()));
    }

    let context_words = words(context);
    let grounded = words(question)
        .iter()
        .filter(|w| w.len() >= 5 && !STOPWORDS.contains(&w.as_str()))
        .any(|w| context_words.contains(w));

    let content = if grounded {
        let first_line = context.lines().next().unwrap_or_default();
        format!("Based on the documents: {}", first_line)
    } else {
        fallback.to_string()
    };

    Ok(Json(json!({
        "model": body["model"],
        "message": { "role": "assistant", "content": content },
        "done": true
    })))
}
