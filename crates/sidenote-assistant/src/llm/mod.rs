//! Completion backend abstraction.
//!
//! A backend answers a role-tagged message list either as one final string
//! or as an incremental chunk stream. Consumers pull chunks in a loop;
//! cancelling is just dropping the stream.

pub mod http;

pub use http::HttpBackend;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Per-request sampling knobs sent alongside the message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 1024 }
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Single-shot completion: the whole reply as one string.
    async fn complete(&self, messages: &[ChatMessage], opts: &GenerationOptions)
        -> Result<String>;

    /// Incremental completion. The default falls back to `complete` and
    /// delivers the reply as a single chunk, so callers can always stream.
    async fn stream(&self, messages: &[ChatMessage], opts: &GenerationOptions)
        -> Result<ChunkStream> {
        let content = self.complete(messages, opts).await?;
        let (tx, rx) = mpsc::channel(1);
        // Receiver buffers the single chunk even after tx drops.
        let _ = tx.send(content).await;
        Ok(ChunkStream::new(rx))
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

/// Pull-based stream of reply chunks, in delivery order.
pub struct ChunkStream {
    receiver: mpsc::Receiver<String>,
}

impl ChunkStream {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    /// Next chunk, or `None` when the reply is complete.
    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Drain the stream into the full reply.
    pub async fn collect(mut self) -> String {
        let mut out = String::new();
        while let Some(chunk) = self.next().await {
            out.push_str(&chunk);
        }
        out
    }
}

impl Stream for ChunkStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
