//! Per-page chat session state.
//!
//! `ChatSession` is the single owned value behind the sidepanel: the
//! tracked page, its conversation, its context, and the reply lifecycle
//! as an explicit state machine. Page switches go through `reset_to`
//! rather than field-by-field mutation, and every reset bumps a
//! generation counter so chunks from a superseded stream can be told
//! apart from live ones.

use thiserror::Error;
use uuid::Uuid;

use crate::types::{Message, PageContext, PageConversation};

/// Lifecycle of the in-flight assistant reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Idle,
    Streaming,
    Complete,
    Failed,
}

impl ResponseState {
    /// Send is only disabled while a reply is actually streaming.
    pub fn accepts_send(&self) -> bool {
        !matches!(self, ResponseState::Streaming)
    }
}

/// Invalid lifecycle transitions are rejected, not silently absorbed;
/// callers decide whether to log-and-drop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("a reply is already streaming")]
    AlreadyStreaming,
    #[error("no streaming reply is active")]
    NotStreaming,
}

#[derive(Debug)]
pub struct ChatSession {
    url: Option<String>,
    title: String,
    messages: Vec<Message>,
    context: Option<PageContext>,
    state: ResponseState,
    generation: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            url: None,
            title: String::new(),
            messages: Vec::new(),
            context: None,
            state: ResponseState::Idle,
            generation: 0,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn context(&self) -> Option<&PageContext> {
        self.context.as_ref()
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    /// Token identifying the current page incarnation. Captured when a
    /// stream starts; compared when its chunks arrive.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The explicit page-switch transition: everything in-memory is
    /// replaced by the new page's persisted state. An in-flight stream
    /// for the old page keeps running but its generation no longer
    /// matches, so its effects are dropped at the door.
    pub fn reset_to(&mut self, conversation: PageConversation) {
        self.generation += 1;
        self.url = Some(conversation.url);
        self.title = conversation.title;
        self.messages = conversation
            .conversation
            .into_iter()
            .map(|mut m| {
                // A persisted streaming flag is a crash artifact; finalize it.
                m.is_streaming = false;
                m
            })
            .collect();
        self.context = conversation.context;
        self.state = ResponseState::Idle;
    }

    pub fn push_user(&mut self, text: &str) -> Message {
        let message = Message::user(text);
        self.messages.push(message.clone());
        message
    }

    pub fn set_context(&mut self, context: PageContext) {
        self.context = Some(context);
    }

    pub fn clear_context(&mut self) {
        self.context = None;
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// Drop oldest messages beyond the cap.
    pub fn trim(&mut self, max_messages: usize) {
        if self.messages.len() > max_messages {
            let remove = self.messages.len() - max_messages;
            self.messages.drain(0..remove);
        }
    }

    /// Start a reply: append the streaming placeholder bubble.
    pub fn begin_stream(&mut self) -> Result<Uuid, TransitionError> {
        if self.state == ResponseState::Streaming {
            return Err(TransitionError::AlreadyStreaming);
        }
        let placeholder = Message::streaming_placeholder();
        let id = placeholder.id;
        self.messages.push(placeholder);
        self.state = ResponseState::Streaming;
        Ok(id)
    }

    /// Append one chunk to the streaming reply, in arrival order.
    pub fn append_chunk(&mut self, chunk: &str) -> Result<&Message, TransitionError> {
        if self.state != ResponseState::Streaming {
            return Err(TransitionError::NotStreaming);
        }
        let message = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.is_streaming)
            .ok_or(TransitionError::NotStreaming)?;
        message.content.push_str(chunk);
        Ok(message)
    }

    /// Finalize the reply; the message becomes immutable.
    pub fn complete_stream(&mut self) -> Result<Message, TransitionError> {
        if self.state != ResponseState::Streaming {
            return Err(TransitionError::NotStreaming);
        }
        let message = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.is_streaming)
            .ok_or(TransitionError::NotStreaming)?;
        message.is_streaming = false;
        self.state = ResponseState::Complete;
        Ok(message.clone())
    }

    /// Fail the reply: overwrite the streaming placeholder with an
    /// error-styled message, or append one when no stream is active.
    /// Either way the session accepts sends again afterwards.
    pub fn fail_stream(&mut self, user_message: &str) -> Message {
        let message = match self.messages.iter_mut().rev().find(|m| m.is_streaming) {
            Some(streaming) => {
                streaming.content = user_message.to_string();
                streaming.is_error = true;
                streaming.is_streaming = false;
                streaming.clone()
            }
            None => {
                let error = Message::error(user_message);
                self.messages.push(error.clone());
                error
            }
        };
        self.state = ResponseState::Failed;
        message
    }

    /// Finalized conversation turns for prompt assembly, oldest first.
    /// Streaming placeholders and error bubbles carry no signal for the
    /// model and are skipped.
    pub fn history_for_prompt(&self, turns: usize) -> Vec<&Message> {
        let mut recent: Vec<&Message> = self
            .messages
            .iter()
            .rev()
            .filter(|m| !m.is_streaming && !m.is_error)
            .take(turns)
            .collect();
        recent.reverse();
        recent
    }

    /// Persistable snapshot of the current page state. Streaming
    /// placeholders are partial by definition and stay in memory only.
    pub fn snapshot(&self) -> Option<PageConversation> {
        let url = self.url.clone()?;
        let mut conversation = PageConversation::new(url, self.title.clone());
        conversation.conversation = self
            .messages
            .iter()
            .filter(|m| !m.is_streaming)
            .cloned()
            .collect();
        conversation.context = self.context.clone();
        conversation.touch();
        Some(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_on(url: &str) -> ChatSession {
        let mut session = ChatSession::new();
        session.reset_to(PageConversation::new(url, "Page"));
        session
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let mut session = session_on("https://a.example/");
        session.begin_stream().expect("begin");
        for chunk in ["The", " quick", "", " fox"] {
            session.append_chunk(chunk).expect("append");
        }
        let done = session.complete_stream().expect("complete");
        assert_eq!(done.content, "The quick fox");
        assert!(!done.is_streaming);
        assert_eq!(session.state(), ResponseState::Complete);
    }

    #[test]
    fn test_begin_rejected_while_streaming() {
        let mut session = session_on("https://a.example/");
        session.begin_stream().expect("begin");
        assert_eq!(session.begin_stream(), Err(TransitionError::AlreadyStreaming));
        assert!(!session.state().accepts_send());
    }

    #[test]
    fn test_append_without_stream_is_rejected() {
        let mut session = session_on("https://a.example/");
        assert!(matches!(
            session.append_chunk("late chunk"),
            Err(TransitionError::NotStreaming)
        ));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn test_fail_replaces_streaming_placeholder() {
        let mut session = session_on("https://a.example/");
        session.push_user("question");
        session.begin_stream().expect("begin");
        session.append_chunk("partial an").expect("append");

        let failed = session.fail_stream("network error");
        assert_eq!(failed.content, "network error");
        assert!(failed.is_error);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(
            session.messages().iter().filter(|m| m.is_error).count(),
            1
        );
        assert!(session.state().accepts_send());
    }

    #[test]
    fn test_fail_without_stream_appends_error() {
        let mut session = session_on("https://a.example/");
        session.push_user("question");
        let before = session.messages().len();

        session.fail_stream("network error");
        assert_eq!(session.messages().len(), before + 1);
        assert!(session.messages().last().map(|m| m.is_error).unwrap_or(false));
    }

    #[test]
    fn test_reset_bumps_generation_and_clears_state() {
        let mut session = session_on("https://a.example/");
        session.push_user("on page a");
        session.begin_stream().expect("begin");
        let old_generation = session.generation();

        session.reset_to(PageConversation::new("https://b.example/", "B"));
        assert!(session.generation() > old_generation);
        assert!(session.messages().is_empty());
        assert_eq!(session.state(), ResponseState::Idle);
        assert_eq!(session.url(), Some("https://b.example/"));
    }

    #[test]
    fn test_history_skips_placeholders_and_errors() {
        let mut session = session_on("https://a.example/");
        session.push_user("q1");
        session.begin_stream().expect("begin");
        session.append_chunk("a1").expect("append");
        session.complete_stream().expect("complete");
        session.fail_stream("boom");
        session.push_user("q2");
        session.begin_stream().expect("begin");

        let history: Vec<&str> = session
            .history_for_prompt(10)
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(history, vec!["q1", "a1", "q2"]);

        let capped: Vec<&str> = session
            .history_for_prompt(2)
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(capped, vec!["a1", "q2"]);
    }

    #[test]
    fn test_snapshot_excludes_streaming_placeholder() {
        let mut session = session_on("https://a.example/");
        session.push_user("q");
        session.begin_stream().expect("begin");
        let snapshot = session.snapshot().expect("has url");
        assert_eq!(snapshot.conversation.len(), 1);
    }

    #[test]
    fn test_trim_drops_oldest() {
        let mut session = session_on("https://a.example/");
        for i in 0..6 {
            session.push_user(&format!("m{i}"));
        }
        session.trim(4);
        assert_eq!(session.messages().len(), 4);
        assert_eq!(session.messages()[0].content, "m2");
    }
}
