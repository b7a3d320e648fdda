//! HTTP API over the session controller.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions` | Create a session |
//! | `GET`    | `/sessions/{id}` | Session transcript |
//! | `POST`   | `/sessions/{id}/ask` | Ask a question, returns the completed turn |
//! | `DELETE` | `/sessions/{id}/history` | Clear the transcript |
//! | `DELETE` | `/sessions/{id}` | Delete the session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "session not found: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404).
//!
//! A question that fails inside the chain is not an HTTP error: the turn is
//! returned with `"status": "failed"` and the error kind and message.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::session::{NoopSink, SessionController, SessionError, Turn};

#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionController>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(sessions: Arc<SessionController>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sessions/{id}/ask", post(handle_ask))
        .route("/sessions/{id}/history", delete(handle_clear_history))
        .layer(cors)
        .with_state(AppState { sessions })
}

/// Serve the API on `bind` until the process is terminated.
pub async fn run_server(bind: &str, sessions: Arc<SessionController>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    println!("ragdesk listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(sessions)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found".to_string(),
                message: err.to_string(),
            },
        }
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    turns: Vec<Turn>,
}

async fn handle_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionResponse>) {
    let session_id = state.sessions.create_session();
    (
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id,
            turns: Vec::new(),
        }),
    )
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let turns = state.sessions.transcript(&id).await?;
    Ok(Json(SessionResponse {
        session_id: id,
        turns,
    }))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<Turn>, AppError> {
    let Json(req) = body.map_err(|rejection| bad_request(rejection.body_text()))?;
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let turn = state.sessions.ask(&id, &req.question, &NoopSink).await?;
    Ok(Json(turn))
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.sessions.clear(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.sessions.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainSettings, QaChain};
    use crate::index::Retriever;
    use crate::llm::ChatModel;
    use crate::models::RetrievedChunk;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::Value;

    struct StaticRetriever;

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn retrieve(&self, _q: &str, _k: usize, _f: usize) -> Result<Vec<RetrievedChunk>> {
            Ok(vec![RetrievedChunk {
                id: "1".into(),
                source: "handbook.md".into(),
                locator: None,
                text: "Vacation is 25 days.".into(),
                score: 1.0,
            }])
        }
    }

    struct StaticModel;

    #[async_trait]
    impl ChatModel for StaticModel {
        fn model_name(&self) -> &str {
            "static"
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
        async fn chat(&self, _prompt: &str) -> Result<String> {
            Ok("25 days.".into())
        }
    }

    async fn spawn() -> String {
        let chain = QaChain::new(
            Arc::new(StaticRetriever),
            Arc::new(StaticModel),
            ChainSettings {
                k: 3,
                fetch_k: 10,
                max_context_chars: 1000,
                fallback_phrase: "unknown".into(),
            },
        );
        let sessions = Arc::new(SessionController::new(Arc::new(chain), 3));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(sessions)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let base = spawn().await;
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let resp = client.post(format!("{}/sessions", base)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = resp.json().await.unwrap();
        let id = created["session_id"].as_str().unwrap().to_string();

        let turn: Value = client
            .post(format!("{}/sessions/{}/ask", base, id))
            .json(&serde_json::json!({ "question": "How much vacation?" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(turn["status"], "answered");
        assert_eq!(turn["answer"], "25 days.");
        assert_eq!(turn["sources"], "handbook.md: Vacation is 25 days.");

        let session: Value = client
            .get(format!("{}/sessions/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["turns"].as_array().unwrap().len(), 1);

        let resp = client
            .delete(format!("{}/sessions/{}/history", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let session: Value = client
            .get(format!("{}/sessions/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(session["turns"].as_array().unwrap().is_empty());

        let resp = client
            .delete(format!("{}/sessions/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn errors_use_json_contract() {
        let base = spawn().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{}/sessions/missing", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");

        let created: Value = client
            .post(format!("{}/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["session_id"].as_str().unwrap();
        let resp = client
            .post(format!("{}/sessions/{}/ask", base, id))
            .json(&serde_json::json!({ "question": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");

        let malformed = client
            .post(format!("{}/sessions/{}/ask", base, id))
            .header("content-type", "application/json")
            .body("{\"question\": ")
            .send()
            .await
            .unwrap();
        let missing = client
            .post(format!("{}/sessions/{}/ask", base, id))
            .send()
            .await
            .unwrap();
        for resp in [malformed, missing] {
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["error"]["code"], "bad_request");
            assert!(!body["error"]["message"].as_str().unwrap().is_empty());
        }
    }
}
