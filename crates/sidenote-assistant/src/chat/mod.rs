//! Sidepanel chat orchestration.
//!
//! `ChatController` coordinates the whole flow: tab focus changes, page
//! context extraction and tagging, prompt assembly, completion dispatch
//! and incremental rendering. `ChatSession` is the owned per-page state
//! with an explicit reset transition; `controller` drives it.

pub mod controller;
pub mod session;

pub use controller::ChatController;
pub use session::{ChatSession, ResponseState, TransitionError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Message, PageContext, Role};

/// Event sink for UI updates. The extension shell implements this to
/// forward events into the sidepanel; tests record them.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &str, data: serde_json::Value);
}

/// No-op emitter for headless contexts.
pub struct NoopEmitter;
impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: &str, _data: serde_json::Value) {}
}

/// Why a send was refused. Callers surface these instead of appending
/// anything to the conversation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("a reply is already streaming")]
    Busy,
}

/// Canned prompt shortcuts. Pure text: nothing downstream treats them
/// specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickAction {
    ExplainMore,
    Simplify,
    MoreExamples,
}

impl QuickAction {
    pub fn prompt(&self) -> &'static str {
        match self {
            QuickAction::ExplainMore => "Explain this in more detail.",
            QuickAction::Simplify => "Simplify that explanation for me.",
            QuickAction::MoreExamples => "Give me more concrete examples.",
        }
    }
}

pub const SYSTEM_PROMPT: &str = "\
You are a reading assistant embedded in the Sidenote extension sidepanel. \
The user is looking at a web page; help them understand it, answer questions \
about it, and connect it to their notes.

Rules:
- Ground answers in the tagged page content when it is provided. The tags \
(<heading>, <list>, <quote>, <code-block>, <comments-section>, ...) describe \
the page's structure; use them to understand the document, never echo them.
- If the page content does not cover a question, say so before answering \
from general knowledge.
- Keep answers short and skimmable: a few sentences, or a compact list.";

/// System prompt plus the active page context, with the tagged page text
/// clipped to a character budget.
pub(crate) fn build_system_prompt(context: Option<&PageContext>, char_budget: usize) -> String {
    let mut prompt = SYSTEM_PROMPT.to_string();
    let Some(ctx) = context else {
        return prompt;
    };
    prompt.push_str("\n\nCurrent page explanation:\n");
    prompt.push_str(&ctx.explanation);
    if let Some(ref original) = ctx.original_text {
        prompt.push_str("\n\nTagged page content:\n");
        prompt.push_str(truncate_chars(original, char_budget));
    }
    prompt
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Transcript export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
    Text,
}

/// Render a conversation transcript for export.
pub fn render_transcript(
    title: &str,
    messages: &[Message],
    format: ExportFormat,
) -> anyhow::Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(messages)?),
        ExportFormat::Markdown => {
            let mut out = format!("# Conversation - {}\n\n", title);
            for message in messages {
                let speaker = match message.role {
                    Role::User => "You",
                    Role::Assistant => "Assistant",
                };
                out.push_str(&format!("## {}\n*{}*\n\n", speaker, message.timestamp.to_rfc3339()));
                out.push_str(&format!("{}\n\n---\n\n", message.content));
            }
            Ok(out)
        }
        ExportFormat::Text => {
            let mut out = String::new();
            for message in messages {
                let speaker = match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                out.push_str(&format!(
                    "[{}] {}\n{}\n\n",
                    speaker,
                    message.timestamp.to_rfc3339(),
                    message.content
                ));
            }
            Ok(out)
        }
    }
}
