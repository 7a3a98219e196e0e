//! Remote blob/table store.
//!
//! The pipeline only needs three things from the remote side: the full set
//! of confirmed hashes (paged), a blob upload keyed by hash, and a metadata
//! record upsert keyed by hash. [`RemoteStore`] captures exactly that.
//!
//! Errors distinguish connection-level failures ([`RemoteError::Unavailable`]),
//! which abort the rest of an upload batch, from per-item rejections
//! ([`RemoteError::Rejected`]), which only fail the item.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpRemoteStore;
pub use memory::InMemoryRemoteStore;

/// Default page size for hash listing.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Errors returned by a remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The store cannot be reached at all.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The store is reachable but refused this item.
    #[error("Remote store rejected '{key}': {reason}")]
    Rejected { key: String, reason: String },

    /// The store answered with something we could not interpret.
    #[error("Invalid response from remote store: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// True if the failure affects every subsequent call, not just this item.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// One page of confirmed hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashPage {
    pub hashes: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub continuation: Option<String>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Fetches one page of confirmed hashes.
    async fn list_hashes_page(
        &self,
        page_size: usize,
        continuation: Option<String>,
    ) -> Result<HashPage, RemoteError>;

    /// Uploads the artifact blob and returns its location.
    async fn upload_blob(&self, hash: &str, bytes: &[u8]) -> Result<String, RemoteError>;

    /// Writes or replaces the metadata record for `hash`.
    async fn upsert_record(&self, hash: &str, fields: &serde_json::Value) -> Result<(), RemoteError>;

    /// Walks every page and returns all confirmed hashes.
    async fn list_all_hashes(&self, page_size: usize) -> Result<Vec<String>, RemoteError> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        let mut continuation = None;
        let mut pages = 0usize;

        loop {
            let page = self.list_hashes_page(page_size, continuation.take()).await?;
            pages += 1;
            let was_empty = page.hashes.is_empty();
            all.extend(page.hashes);

            match page.continuation {
                Some(token) if !was_empty => continuation = Some(token),
                _ => break,
            }
        }

        tracing::debug!(pages, hashes = all.len(), "Fetched remote hash listing");
        Ok(all)
    }
}
