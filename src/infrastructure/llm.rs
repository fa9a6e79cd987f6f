//! Chat-completions client for an OpenAI-compatible provider.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::LlmEnvConfig;
use crate::domain::errors::LlmError;
use crate::domain::ports::{LlmService, TokenStream};

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    base_url: String,
}

impl LlmClient {
    pub fn new(config: &LlmEnvConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(&self, system: &str, user: &str, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Request {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let snippet: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(400)
                .collect();
            return Err(LlmError::Request {
                reason: format!("{}: {}", status.as_u16(), snippet),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmService for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = self.request_body(system, user, false);
        let response = self.send(&body).await?;
        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::Malformed {
                reason: e.to_string(),
            })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .ok_or(LlmError::Malformed {
                reason: "response carried no choices".to_string(),
            })
    }

    async fn stream(&self, system: &str, user: &str) -> Result<TokenStream, LlmError> {
        let body = self.request_body(system, user, true);
        let response = self.send(&body).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::Request {
                                reason: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE framing: one `data: {json}` payload per line, closed
                // by `data: [DONE]`.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            let token = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                .unwrap_or_default();
                            if !token.is_empty() && tx.send(Ok(token)).await.is_err() {
                                // Receiver gone: the turn was cancelled.
                                return;
                            }
                        }
                        Err(e) => debug!("Skipping undecodable stream chunk: {e}"),
                    }
                }
            }
        });

        Ok(rx)
    }
}
