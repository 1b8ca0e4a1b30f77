//! OpenAI-compatible chat-completion backend over HTTP.
//!
//! Non-streaming requests parse the usual `choices[0].message.content`
//! shape; streaming requests read SSE lines (`data: {...}`, terminated by
//! `data: [DONE]`) and forward each content delta as one chunk.

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::{ChatMessage, ChatRole, ChunkStream, CompletionBackend, GenerationOptions};

use crate::config::BackendConfig;

pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    streaming: bool,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            streaming = config.streaming,
            "completion backend ready"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            streaming: config.streaming,
        })
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        opts: &GenerationOptions,
        stream: bool,
    ) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": opts.temperature,
            "max_tokens": opts.max_tokens,
            "stream": stream,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("request to {} timed out", self.endpoint)
                } else if e.is_connect() {
                    anyhow!("failed to connect to {}: {}", self.endpoint, e)
                } else {
                    anyhow!("request to {} failed: {}", self.endpoint, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            let preview: String = error.chars().take(300).collect();
            return Err(anyhow!("completion API error ({}): {}", status, preview));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &GenerationOptions,
    ) -> Result<String> {
        let body = self.build_request(messages, opts, false);
        let response = self.send(&body).await?;

        let raw = response.text().await.context("failed to read response body")?;
        // Gateways sometimes return an HTML error page with a 200.
        if raw.trim_start().starts_with('<') {
            let preview: String = raw.trim_start().chars().take(200).collect();
            return Err(anyhow!(
                "completion endpoint returned HTML instead of JSON: {}",
                preview
            ));
        }

        let parsed: CompletionResponse = serde_json::from_str(&raw).map_err(|e| {
            let preview: String = raw.chars().take(300).collect();
            anyhow!("malformed completion response ({}): {}", e, preview)
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("completion response contained no choices"))?;
        Ok(choice.message.content)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        opts: &GenerationOptions,
    ) -> Result<ChunkStream> {
        let body = self.build_request(messages, opts, true);
        let response = self.send(&body).await?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if content_type.contains("text/html") {
            return Err(anyhow!(
                "completion endpoint answered the stream request with HTML ({})",
                content_type
            ));
        }

        let (tx, rx) = mpsc::channel::<String>(256);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk: Bytes = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "completion stream transport error");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(delta) = parsed["choices"][0]["delta"]["content"].as_str() {
                            if !delta.is_empty() && tx.send(delta.to_string()).await.is_err() {
                                // Consumer stopped iterating; that is the
                                // cancellation path.
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(ChunkStream::new(rx))
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}
