//! In-process remote store with failure injection.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{HashPage, RemoteError, RemoteStore};

#[derive(Debug, Default)]
struct Inner {
    hashes: BTreeSet<String>,
    blobs: HashMap<String, Vec<u8>>,
    records: HashMap<String, serde_json::Value>,
    rejected: HashSet<String>,
    /// Uploads allowed before the store goes unavailable.
    uploads_before_outage: Option<usize>,
}

/// Remote store kept entirely in memory.
///
/// A hash counts as confirmed once its record has been written.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    list_calls: AtomicUsize,
    upload_calls: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `hashes`.
    pub fn with_hashes<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            inner.hashes.extend(hashes.into_iter().map(Into::into));
        }
        store
    }

    /// Makes every call fail with [`RemoteError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes uploads of `hash` fail with [`RemoteError::Rejected`].
    pub fn reject_hash(&self, hash: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.rejected.insert(hash.into());
        }
    }

    /// Lets `count` more blob uploads through, then goes unavailable.
    pub fn fail_after_uploads(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.uploads_before_outage = Some(count);
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.lock().map(|i| i.hashes.contains(hash)).unwrap_or(false)
    }

    pub fn hash_count(&self) -> usize {
        self.lock().map(|i| i.hashes.len()).unwrap_or(0)
    }

    pub fn blob(&self, hash: &str) -> Option<Vec<u8>> {
        self.lock().ok().and_then(|i| i.blobs.get(hash).cloned())
    }

    pub fn record(&self, hash: &str) -> Option<serde_json::Value> {
        self.lock().ok().and_then(|i| i.records.get(hash).cloned())
    }

    /// Number of page requests served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of blob upload attempts.
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, RemoteError> {
        self.inner
            .lock()
            .map_err(|_| RemoteError::Unavailable("in-memory store poisoned".to_string()))
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn list_hashes_page(
        &self,
        page_size: usize,
        continuation: Option<String>,
    ) -> Result<HashPage, RemoteError> {
        self.check_available()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let start = match continuation {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::InvalidResponse(format!("bad continuation '{}'", token)))?,
            None => 0,
        };
        let inner = self.lock()?;
        let hashes: Vec<String> = inner
            .hashes
            .iter()
            .skip(start)
            .take(page_size.max(1))
            .cloned()
            .collect();
        let end = start + hashes.len();
        let continuation = (end < inner.hashes.len()).then(|| end.to_string());
        Ok(HashPage {
            hashes,
            continuation,
        })
    }

    async fn upload_blob(&self, hash: &str, bytes: &[u8]) -> Result<String, RemoteError> {
        self.check_available()?;
        self.upload_calls.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.lock()?;
        if let Some(remaining) = inner.uploads_before_outage {
            if remaining == 0 {
                drop(inner);
                self.set_unavailable(true);
                return Err(RemoteError::Unavailable(
                    "in-memory store went offline".to_string(),
                ));
            }
            inner.uploads_before_outage = Some(remaining - 1);
        }
        if inner.rejected.contains(hash) {
            return Err(RemoteError::Rejected {
                key: hash.to_string(),
                reason: "rejected by failure injection".to_string(),
            });
        }
        inner.blobs.insert(hash.to_string(), bytes.to_vec());
        Ok(format!("memory://blobs/{}", hash))
    }

    async fn upsert_record(&self, hash: &str, fields: &serde_json::Value) -> Result<(), RemoteError> {
        self.check_available()?;
        let mut inner = self.lock()?;
        inner.records.insert(hash.to_string(), fields.clone());
        inner.hashes.insert(hash.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_confirms_hash() {
        let store = InMemoryRemoteStore::new();
        let url = store.upload_blob("abc", b"{}").await.unwrap();
        assert_eq!(url, "memory://blobs/abc");
        assert!(!store.contains("abc"));

        store
            .upsert_record("abc", &serde_json::json!({"width": 3}))
            .await
            .unwrap();
        assert!(store.contains("abc"));
        assert_eq!(store.record("abc").unwrap()["width"], 3);
        assert_eq!(store.blob("abc").unwrap(), b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_rejected_hash() {
        let store = InMemoryRemoteStore::new();
        store.reject_hash("bad");
        let err = store.upload_blob("bad", b"x").await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
        assert!(store.upload_blob("good", b"x").await.is_ok());
    }

    #[tokio::test]
    async fn test_outage_after_uploads() {
        let store = InMemoryRemoteStore::new();
        store.fail_after_uploads(1);
        assert!(store.upload_blob("a", b"x").await.is_ok());
        let err = store.upload_blob("b", b"x").await.unwrap_err();
        assert!(err.is_connection_level());
        assert!(store.list_hashes_page(10, None).await.is_err());
    }

    #[tokio::test]
    async fn test_paging() {
        let store = InMemoryRemoteStore::with_hashes(["a", "b", "c"]);
        let first = store.list_hashes_page(2, None).await.unwrap();
        assert_eq!(first.hashes, vec!["a", "b"]);
        let second = store
            .list_hashes_page(2, first.continuation)
            .await
            .unwrap();
        assert_eq!(second.hashes, vec!["c"]);
        assert!(second.continuation.is_none());
    }
}
