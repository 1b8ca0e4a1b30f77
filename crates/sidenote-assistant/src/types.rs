//! Core data model for page-scoped conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single conversation turn. Mutated in place only while `is_streaming`
/// is set; immutable once the stream finalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_streaming: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Empty assistant message that accumulates streamed chunks.
    pub fn streaming_placeholder() -> Self {
        let mut msg = Self::new(Role::Assistant, String::new());
        msg.is_streaming = true;
        msg
    }

    /// Error-styled assistant message shown when a reply fails.
    pub fn error(content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Assistant, content.into());
        msg.is_error = true;
        msg
    }

    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            is_error: false,
            is_streaming: false,
        }
    }
}

/// The assistant's standing explanation anchored to the current page,
/// distinct from the turn-by-turn conversation. At most one per page;
/// replaced wholesale on refresh and cleared independently of history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub explanation: String,
    /// Semantically tagged page text the explanation is anchored to.
    pub original_text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PageContext {
    pub fn new(explanation: impl Into<String>, original_text: Option<String>) -> Self {
        Self {
            explanation: explanation.into(),
            original_text,
            timestamp: Utc::now(),
        }
    }
}

/// The persisted unit: one conversation plus context per distinct page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConversation {
    pub url: String,
    pub title: String,
    pub conversation: Vec<Message>,
    pub context: Option<PageContext>,
    pub last_updated: DateTime<Utc>,
}

impl PageConversation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            conversation: Vec::new(),
            context: None,
            last_updated: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
