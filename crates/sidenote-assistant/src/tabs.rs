//! Browser tab query seam.
//!
//! The extension shell answers "what page is focused" by shipping the
//! serialized DOM subtree the content script captured. Returning `None`
//! (no active tab) must never crash the controller.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extract::DomNode;

/// Snapshot of the focused tab as delivered over the messaging boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub url: String,
    pub title: String,
    /// Captured DOM of the page, absent when the content script could not
    /// run (restricted pages, PDFs, etc.).
    #[serde(default)]
    pub document: Option<DomNode>,
}

#[async_trait]
pub trait TabProvider: Send + Sync {
    /// The currently focused tab, or `None` when no tab is available.
    async fn active_tab(&self) -> Result<Option<TabSnapshot>>;
}
