//! Page-scoped conversation and context engine for the Sidenote
//! extension sidepanel.
//!
//! The extension shell supplies three seams (a [`tabs::TabProvider`] for
//! the focused page, a [`chat::EventEmitter`] for UI events, and a
//! [`llm::CompletionBackend`] for replies) and drives everything else
//! through [`chat::ChatController`].

pub mod chat;
pub mod config;
pub mod extract;
pub mod llm;
pub mod store;
pub mod tabs;
pub mod tagger;
pub mod types;

// Re-export primary types for convenience
pub use chat::{ChatController, ChatError, ChatSession, EventEmitter, ExportFormat, NoopEmitter, QuickAction, ResponseState};
pub use config::{BackendConfig, ChatConfig, Config};
pub use extract::{extract_page, ExtractedPage};
pub use llm::{ChatMessage, ChatRole, ChunkStream, CompletionBackend, GenerationOptions, HttpBackend};
pub use store::{ConversationStore, PendingContext};
pub use tabs::{TabProvider, TabSnapshot};
pub use types::{Message, PageContext, PageConversation, Role};

pub use anyhow::{Error, Result};
