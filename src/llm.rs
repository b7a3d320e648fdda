//! Chat model client.
//!
//! [`ChatModel`] is the generation seam used by the chain. [`OllamaChat`]
//! talks to an Ollama-compatible server: `GET /api/tags` for health and
//! `POST /api/chat` (non-streaming) for completions. Calls are never retried;
//! a failed generation surfaces to the caller as-is.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Whether the endpoint is reachable and answering.
    async fn health_check(&self) -> Result<bool>;

    /// Single-turn completion of `prompt`, returned verbatim.
    async fn chat(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, thiserror::Error)]
#[error("model endpoint {url} unavailable after {attempts} attempts")]
pub struct ModelUnavailable {
    pub url: String,
    pub attempts: u32,
}

pub struct OllamaChat {
    url: String,
    model: String,
    temperature: Option<f64>,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client: builder.build()?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Names of the models the server has pulled.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Failed to list models: {}", resp.status());
        }
        let json: Value = resp.json().await?;
        Ok(parse_model_names(&json))
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let res = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await;
        match res {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["options"] = json!({ "temperature": t });
        }

        let resp = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Ollama chat error {}: {}", status, text);
        }

        let payload: Value = resp.json().await?;
        parse_chat_response(&payload)
    }
}

fn parse_chat_response(payload: &Value) -> Result<String> {
    if let Some(err) = payload.get("error").and_then(|e| e.as_str()) {
        bail!("Ollama chat error: {}", err);
    }
    payload["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

fn parse_model_names(json: &Value) -> Vec<String> {
    json["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["name"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// `llama3.2` matches `llama3.2:latest`.
fn model_is_listed(model: &str, names: &[String]) -> bool {
    names.iter().any(|n| {
        n == model || n.strip_suffix(":latest") == Some(model)
    })
}

/// Poll `health_check` until it succeeds, at most `attempts` times with
/// `interval` between tries.
pub async fn wait_until_ready(
    model: &dyn ChatModel,
    url: &str,
    attempts: u32,
    interval: Duration,
) -> Result<()> {
    for attempt in 1..=attempts {
        if model.health_check().await.unwrap_or(false) {
            tracing::info!(url, attempt, "model endpoint ready");
            return Ok(());
        }
        tracing::info!(url, attempt, attempts, "waiting for model endpoint");
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(ModelUnavailable {
        url: url.to_string(),
        attempts,
    }
    .into())
}

/// Wait for the configured Ollama server and warn if the model is missing.
pub async fn connect(config: &LlmConfig) -> Result<OllamaChat> {
    let chat = OllamaChat::new(config)?;
    wait_until_ready(
        &chat,
        chat.url(),
        config.startup_attempts,
        Duration::from_millis(config.poll_interval_ms),
    )
    .await?;

    match chat.list_models().await {
        Ok(names) if !model_is_listed(&chat.model, &names) => {
            tracing::warn!(
                model = %chat.model,
                "model not found on server; run `ollama pull {}`",
                chat.model
            );
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "could not list models"),
    }
    Ok(chat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyModel {
        healthy_after: u32,
        polls: AtomicU32,
    }

    #[async_trait]
    impl ChatModel for FlakyModel {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn health_check(&self) -> Result<bool> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= self.healthy_after)
        }

        async fn chat(&self, _prompt: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn ready_after_some_polls() {
        let model = FlakyModel {
            healthy_after: 3,
            polls: AtomicU32::new(0),
        };
        wait_until_ready(&model, "http://x", 5, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(model.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let model = FlakyModel {
            healthy_after: 100,
            polls: AtomicU32::new(0),
        };
        let err = wait_until_ready(&model, "http://x", 4, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(model.polls.load(Ordering::SeqCst), 4);
        let unavailable = err.downcast_ref::<ModelUnavailable>().unwrap();
        assert_eq!(unavailable.attempts, 4);
    }

    #[test]
    fn parses_chat_content() {
        let payload = json!({
            "model": "llama3.2",
            "message": { "role": "assistant", "content": "  Paris.\n" },
            "done": true
        });
        assert_eq!(parse_chat_response(&payload).unwrap(), "  Paris.\n");
        assert!(parse_chat_response(&json!({ "error": "model not found" })).is_err());
        assert!(parse_chat_response(&json!({ "done": true })).is_err());
    }

    #[test]
    fn model_listing_accepts_latest_tag() {
        let names = parse_model_names(&json!({
            "models": [{ "name": "llama3.2:latest" }, { "name": "nomic-embed-text:v1.5" }]
        }));
        assert!(model_is_listed("llama3.2", &names));
        assert!(model_is_listed("llama3.2:latest", &names));
        assert!(!model_is_listed("nomic-embed-text", &names));
    }

    #[tokio::test]
    async fn unreachable_server_is_unhealthy() {
        let config = LlmConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: Some(2),
            ..LlmConfig::default()
        };
        let chat = OllamaChat::new(&config).unwrap();
        assert!(!chat.health_check().await.unwrap());
        assert!(chat.chat("hi").await.is_err());
    }
}
