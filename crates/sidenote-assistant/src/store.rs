//! Page-scoped conversation persistence.
//!
//! One JSON file per page key under `<data_dir>/conversations/`, fronted
//! by a bounded LRU cache. Saves are last-write-wins; the single-threaded
//! event model serializes writes per key. Persistence failures are logged
//! and absorbed; the conversation keeps working in memory.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Message, PageContext, PageConversation};

/// Maximum length of a normalized URL key (before the `page_` prefix).
const KEY_MAX_LEN: usize = 64;

/// Legacy single-conversation blobs from before page scoping.
const LEGACY_CONVERSATION_FILE: &str = "chat_conversation.json";
const LEGACY_CONTEXT_FILE: &str = "chat_context.json";
const PENDING_CONTEXT_FILE: &str = "pending_context.json";
const CONVERSATIONS_DIR: &str = "conversations";

/// Context handed off from another UI surface (e.g. an in-page action)
/// before the sidepanel has initialized. Short-lived by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingContext {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub explanation: String,
    #[serde(default)]
    pub original_text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PendingContext {
    pub fn into_context(self) -> PageContext {
        PageContext {
            explanation: self.explanation,
            original_text: self.original_text,
            timestamp: self.timestamp,
        }
    }
}

/// Row in the stored-conversations listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub key: String,
    pub url: String,
    pub title: String,
    pub message_count: usize,
    pub last_updated: DateTime<Utc>,
}

pub struct ConversationStore {
    data_dir: PathBuf,
    cache: Mutex<LruCache<String, PageConversation>>,
    pending_ttl: Duration,
}

impl ConversationStore {
    /// Open (creating directories as needed). `max_pages` bounds how many
    /// page conversations are retained; least-recently-used entries are
    /// evicted from disk as well as memory.
    pub fn open(data_dir: impl Into<PathBuf>, max_pages: usize, pending_ttl_secs: u64) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join(CONVERSATIONS_DIR))
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let capacity = NonZeroUsize::new(max_pages.max(1)).expect("capacity is non-zero");
        Ok(Self {
            data_dir,
            cache: Mutex::new(LruCache::new(capacity)),
            pending_ttl: Duration::seconds(pending_ttl_secs as i64),
        })
    }

    /// Lossy page key: scheme and leading `www.` stripped, every
    /// non-alphanumeric mapped to `_`, bounded length. Distinct URLs can
    /// collide; accepted limitation of the keying scheme.
    pub fn page_key(url: &str) -> String {
        let stripped = url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.");
        let normalized: String = stripped
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .take(KEY_MAX_LEN)
            .collect();
        format!("page_{}", normalized)
    }

    /// Load the conversation for `url`, if one was ever saved. Adopts the
    /// pre-page-scoping legacy blob on first call after an upgrade.
    pub fn load(&self, url: &str, title: &str) -> Option<PageConversation> {
        let key = Self::page_key(url);

        {
            let mut cache = self.cache.lock();
            if let Some(conv) = cache.get(&key) {
                return Some(conv.clone());
            }
        }

        if let Some(conv) = self.read_page_file(&key) {
            self.remember(key, conv.clone());
            return Some(conv);
        }

        if let Some(conv) = self.migrate_legacy(url, title) {
            return Some(conv);
        }

        None
    }

    /// Load or lazily create the conversation for `url`.
    pub fn load_or_init(&self, url: &str, title: &str) -> PageConversation {
        match self.load(url, title) {
            Some(mut conv) => {
                // Titles drift (SPAs rewrite them); keep the latest.
                if !title.is_empty() && conv.title != title {
                    conv.title = title.to_string();
                }
                conv
            }
            None => PageConversation::new(url, title),
        }
    }

    /// Persist a conversation. Idempotent, last-write-wins. Errors are
    /// logged, never propagated: callers must keep working in memory.
    pub fn save(&self, conversation: &PageConversation) {
        if let Err(e) = self.try_save(conversation) {
            tracing::warn!(url = %conversation.url, error = %e, "failed to persist conversation");
        }
    }

    /// Fallible save used by `save` and by tests asserting on disk state.
    pub fn try_save(&self, conversation: &PageConversation) -> Result<()> {
        let key = Self::page_key(&conversation.url);
        let path = self.page_path(&key);
        let json = serde_json::to_string_pretty(conversation)
            .context("failed to serialize conversation")?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.remember(key, conversation.clone());
        Ok(())
    }

    /// One-shot legacy migration: adopt the global pre-upgrade blob as
    /// this page's conversation, persist under the page key, delete the
    /// legacy pair. Safe to run any number of times — after the first
    /// success the blob is gone and this is a no-op.
    fn migrate_legacy(&self, url: &str, title: &str) -> Option<PageConversation> {
        let conv_path = self.data_dir.join(LEGACY_CONVERSATION_FILE);
        let ctx_path = self.data_dir.join(LEGACY_CONTEXT_FILE);
        if !conv_path.exists() {
            return None;
        }

        let messages: Vec<Message> = match read_json(&conv_path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable legacy conversation blob, dropping it");
                let _ = fs::remove_file(&conv_path);
                let _ = fs::remove_file(&ctx_path);
                return None;
            }
        };
        let context: Option<PageContext> = read_json(&ctx_path).ok();

        let mut conv = PageConversation::new(url, title);
        conv.conversation = messages;
        conv.context = context;
        conv.touch();

        if let Err(e) = self.try_save(&conv) {
            // Keep the blob so the next load can retry the migration.
            tracing::warn!(error = %e, "legacy migration save failed, keeping blob");
            return Some(conv);
        }
        let _ = fs::remove_file(&conv_path);
        let _ = fs::remove_file(&ctx_path);
        tracing::info!(url = %url, messages = conv.conversation.len(), "migrated legacy conversation");
        Some(conv)
    }

    /// Stash a context handoff for whichever surface initializes next.
    pub fn stash_pending_context(&self, pending: &PendingContext) -> Result<()> {
        let path = self.data_dir.join(PENDING_CONTEXT_FILE);
        let json = serde_json::to_string_pretty(pending)
            .context("failed to serialize pending context")?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Consume the pending handoff. The entry is removed regardless;
    /// anything older than the TTL is silently discarded, not an error.
    pub fn take_pending_context(&self) -> Option<PendingContext> {
        let path = self.data_dir.join(PENDING_CONTEXT_FILE);
        if !path.exists() {
            return None;
        }
        let pending: Result<PendingContext> = read_json(&path);
        let _ = fs::remove_file(&path);

        match pending {
            Ok(p) if Utc::now() - p.timestamp <= self.pending_ttl => Some(p),
            Ok(p) => {
                tracing::debug!(age_secs = (Utc::now() - p.timestamp).num_seconds(), "pending context expired");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "unreadable pending context");
                None
            }
        }
    }

    /// Summaries of every stored page conversation, newest first.
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let dir = self.data_dir.join(CONVERSATIONS_DIR);
        let mut rows = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list conversations dir");
                return rows;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let conv: PageConversation = match read_json(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable conversation");
                    continue;
                }
            };
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            rows.push(ConversationSummary {
                key,
                url: conv.url.clone(),
                title: conv.title.clone(),
                message_count: conv.conversation.len(),
                last_updated: conv.last_updated,
            });
        }
        rows.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        rows
    }

    fn remember(&self, key: String, conversation: PageConversation) {
        let evicted = {
            let mut cache = self.cache.lock();
            cache.push(key.clone(), conversation)
        };
        // `push` returns the displaced entry: either the old value for the
        // same key (a plain update) or the least-recently-used page, whose
        // file goes with it.
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                let path = self.page_path(&evicted_key);
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(key = %evicted_key, error = %e, "failed to remove evicted conversation");
                } else {
                    tracing::info!(key = %evicted_key, "evicted least-recently-used conversation");
                }
            }
        }
    }

    fn read_page_file(&self, key: &str) -> Option<PageConversation> {
        let path = self.page_path(key);
        if !path.exists() {
            return None;
        }
        match read_json(&path) {
            Ok(conv) => Some(conv),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "unreadable conversation file");
                None
            }
        }
    }

    fn page_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(CONVERSATIONS_DIR).join(format!("{key}.json"))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
