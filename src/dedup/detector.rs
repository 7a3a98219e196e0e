//! Three-state duplicate detector.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::{CacheContents, CacheError, CacheFile};
use crate::circuit::{content_hash, ContentHash, Fingerprint};
use crate::remote::{RemoteStore, DEFAULT_PAGE_SIZE};

/// Externally observable state of a known hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashRecordState {
    /// Seen in this run, not yet queued for upload.
    Session,
    /// Queued for upload.
    Pending,
    /// Present in the remote store.
    Confirmed,
}

/// The three pairwise-disjoint hash sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashState {
    confirmed: HashSet<String>,
    pending: HashSet<String>,
    session: HashSet<String>,
}

impl HashState {
    pub fn contains(&self, hash: &str) -> bool {
        self.state_of(hash).is_some()
    }

    pub fn state_of(&self, hash: &str) -> Option<HashRecordState> {
        if self.confirmed.contains(hash) {
            Some(HashRecordState::Confirmed)
        } else if self.pending.contains(hash) {
            Some(HashRecordState::Pending)
        } else if self.session.contains(hash) {
            Some(HashRecordState::Session)
        } else {
            None
        }
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn session_len(&self) -> usize {
        self.session.len()
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len() + self.session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if no hash is in more than one set.
    pub fn is_disjoint(&self) -> bool {
        self.confirmed.is_disjoint(&self.pending)
            && self.confirmed.is_disjoint(&self.session)
            && self.pending.is_disjoint(&self.session)
    }

    /// Inserts into Session if the hash is unknown. Returns true if inserted.
    fn insert_session(&mut self, hash: &str) -> bool {
        if self.contains(hash) {
            return false;
        }
        self.session.insert(hash.to_string())
    }

    fn confirm(&mut self, hash: &str) {
        self.pending.remove(hash);
        self.session.remove(hash);
        self.confirmed.insert(hash.to_string());
    }

    fn from_contents(contents: &CacheContents) -> Self {
        let mut state = Self {
            confirmed: contents.confirmed.iter().cloned().collect(),
            ..Self::default()
        };
        // A hand-edited file might overlap; confirmed wins, then pending.
        for hash in &contents.pending {
            if !state.confirmed.contains(hash) {
                state.pending.insert(hash.clone());
            }
        }
        for hash in &contents.session {
            if !state.contains(hash) {
                state.session.insert(hash.clone());
            }
        }
        state
    }

    fn to_contents(&self) -> CacheContents {
        CacheContents {
            confirmed: self.confirmed.iter().cloned().collect(),
            pending: self.pending.iter().cloned().collect(),
            session: self.session.iter().cloned().collect(),
            last_sync: None,
            last_write: None,
            total_count: self.confirmed.len(),
        }
    }
}

/// Result of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub is_duplicate: bool,
    pub hash: ContentHash,
}

/// How [`DuplicateDetector::initialize`] went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub loaded_from_cache: bool,
    /// Hashes received from the remote store, if it was queried successfully.
    pub fetched_from_remote: Option<usize>,
    pub remote_error: Option<String>,
}

/// Counts and metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorStats {
    pub confirmed: usize,
    pub pending: usize,
    pub session: usize,
    pub total: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_write: Option<DateTime<Utc>>,
    pub cache_path: Option<PathBuf>,
    /// True once a listing or upload against the remote store has succeeded.
    pub remote_connected: bool,
}

/// Classifies content hashes as Confirmed, Pending or Session.
///
/// Owned by the pipeline manager. Workers get a [`DetectorView`] over a
/// snapshot of the state instead of shared access.
#[derive(Debug)]
pub struct DuplicateDetector {
    state: Arc<HashState>,
    cache: Option<CacheFile>,
    last_sync: Option<DateTime<Utc>>,
    last_write: Option<DateTime<Utc>>,
    remote_connected: bool,
    page_size: usize,
}

impl DuplicateDetector {
    /// Creates a detector persisted to `cache_path`. Call
    /// [`initialize`](Self::initialize) before use.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(HashState::default()),
            cache: Some(CacheFile::new(cache_path)),
            last_sync: None,
            last_write: None,
            remote_connected: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Creates a detector with no backing file.
    pub fn in_memory() -> Self {
        Self {
            cache: None,
            ..Self::new(PathBuf::new())
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Loads the cache and, when needed, the remote hash listing.
    ///
    /// Without `force_refresh` the remote is only queried if no cache file
    /// exists. With it, the remote listing replaces the Confirmed set and
    /// Pending hashes the remote does not know are demoted to Session. Any
    /// remote failure leaves the cached state in place. Never fails.
    pub async fn initialize(
        &mut self,
        remote: Option<&dyn RemoteStore>,
        force_refresh: bool,
    ) -> InitReport {
        let mut report = InitReport::default();

        if let Some(cache) = &self.cache {
            match cache.load() {
                Ok(Some(contents)) => {
                    self.state = Arc::new(HashState::from_contents(&contents));
                    self.last_sync = contents.last_sync;
                    self.last_write = contents.last_write;
                    report.loaded_from_cache = true;
                    info!(
                        path = %cache.path().display(),
                        confirmed = self.state.confirmed_len(),
                        pending = self.state.pending_len(),
                        session = self.state.session_len(),
                        "Loaded duplicate cache"
                    );
                }
                Ok(None) => debug!(path = %cache.path().display(), "No duplicate cache on disk"),
                Err(e) => warn!(error = %e, "Ignoring unreadable duplicate cache"),
            }
        }

        let Some(remote) = remote else {
            self.remote_connected = false;
            return report;
        };

        // Not contacted; `remote_connected` stays false until a call succeeds.
        if report.loaded_from_cache && !force_refresh {
            self.remote_connected = false;
            return report;
        }

        match remote.list_all_hashes(self.page_size).await {
            Ok(hashes) => {
                let fetched = hashes.len();
                self.apply_remote_listing(hashes, force_refresh);
                self.last_sync = Some(Utc::now());
                self.remote_connected = true;
                report.fetched_from_remote = Some(fetched);
                info!(remote = %remote.describe(), fetched, "Synchronized duplicate cache with remote store");
                if let Err(e) = self.persist() {
                    warn!(error = %e, "Failed to persist duplicate cache after sync");
                }
            }
            Err(e) => {
                self.remote_connected = false;
                warn!(
                    remote = %remote.describe(),
                    error = %e,
                    cached = report.loaded_from_cache,
                    "Remote store unavailable, continuing with local duplicate cache"
                );
                report.remote_error = Some(e.to_string());
            }
        }
        report
    }

    fn apply_remote_listing(&mut self, hashes: Vec<String>, authoritative: bool) {
        let remote: HashSet<String> = hashes.into_iter().collect();
        let state = Arc::make_mut(&mut self.state);

        if authoritative {
            state.confirmed.clear();
            // Nothing is in flight between runs; unknown pending hashes go back to session.
            let stale: Vec<String> = state
                .pending
                .iter()
                .filter(|h| !remote.contains(*h))
                .cloned()
                .collect();
            for hash in stale {
                state.pending.remove(&hash);
                state.session.insert(hash);
            }
        }
        for hash in &remote {
            state.confirm(hash);
        }
    }

    /// Hashes `item` and classifies it. A new hash is added to Session.
    pub fn check<F: Fingerprint + ?Sized>(&mut self, item: &F) -> CheckOutcome {
        let hash = content_hash(item);
        let is_duplicate = self.state.contains(&hash.digest);
        if !is_duplicate {
            Arc::make_mut(&mut self.state).insert_session(&hash.digest);
        }
        CheckOutcome { is_duplicate, hash }
    }

    /// Moves a hash from Session to Pending. Confirmed hashes are left alone.
    pub fn mark_pending_upload(&mut self, hash: &str) -> bool {
        if self.state.confirmed.contains(hash) {
            return false;
        }
        let state = Arc::make_mut(&mut self.state);
        state.session.remove(hash);
        state.pending.insert(hash.to_string());
        true
    }

    /// Moves a hash to Confirmed and persists the cache.
    ///
    /// A failed write is logged; the in-memory state is already updated.
    pub fn mark_uploaded(&mut self, hash: &str) {
        Arc::make_mut(&mut self.state).confirm(hash);
        self.remote_connected = true;
        if let Err(e) = self.persist() {
            warn!(hash, error = %e, "Failed to persist duplicate cache after upload");
        }
    }

    /// Moves a hash from Pending back to Session.
    ///
    /// The hash is not re-queued for upload.
    pub fn mark_upload_failed(&mut self, hash: &str) {
        if self.state.confirmed.contains(hash) {
            return;
        }
        let state = Arc::make_mut(&mut self.state);
        state.pending.remove(hash);
        state.session.insert(hash.to_string());
    }

    /// Adds hashes found by workers to Session. Known hashes are skipped.
    /// Returns how many were new.
    pub fn merge_session_hashes<I, S>(&mut self, hashes: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for hash in hashes {
            let hash = hash.as_ref();
            if !self.state.contains(hash) {
                Arc::make_mut(&mut self.state).insert_session(hash);
                added += 1;
            }
        }
        added
    }

    pub fn state_of(&self, hash: &str) -> Option<HashRecordState> {
        self.state.state_of(hash)
    }

    /// Cheap copy of the current sets for handing to workers.
    pub fn snapshot(&self) -> Arc<HashState> {
        Arc::clone(&self.state)
    }

    /// A worker-side view over the current snapshot.
    pub fn view(&self) -> DetectorView {
        DetectorView::new(self.snapshot())
    }

    pub fn remote_connected(&self) -> bool {
        self.remote_connected
    }

    /// Records that the remote store stopped answering.
    pub fn mark_remote_unavailable(&mut self) {
        self.remote_connected = false;
    }

    /// Writes the cache file. No-op for in-memory detectors.
    pub fn persist(&mut self) -> Result<(), CacheError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let now = Utc::now();
        let mut contents = self.state.to_contents();
        contents.last_sync = self.last_sync;
        contents.last_write = Some(now);
        cache.save(&contents)?;
        self.last_write = Some(now);
        Ok(())
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            confirmed: self.state.confirmed_len(),
            pending: self.state.pending_len(),
            session: self.state.session_len(),
            total: self.state.len(),
            last_sync: self.last_sync,
            last_write: self.last_write,
            cache_path: self.cache.as_ref().map(|c| c.path().to_path_buf()),
            remote_connected: self.remote_connected,
        }
    }
}

/// Worker-local duplicate checks over a snapshot.
///
/// New hashes are recorded locally and handed back to the manager with the
/// task result; they are not visible to other workers until the next batch.
#[derive(Debug, Clone)]
pub struct DetectorView {
    base: Arc<HashState>,
    local: HashSet<String>,
}

impl DetectorView {
    pub fn new(base: Arc<HashState>) -> Self {
        Self {
            base,
            local: HashSet::new(),
        }
    }

    pub fn check<F: Fingerprint + ?Sized>(&mut self, item: &F) -> CheckOutcome {
        let hash = content_hash(item);
        let is_duplicate =
            self.base.contains(&hash.digest) || self.local.contains(&hash.digest);
        if !is_duplicate {
            self.local.insert(hash.digest.clone());
        }
        CheckOutcome { is_duplicate, hash }
    }

    /// Hashes first seen through this view.
    pub fn session_hashes(&self) -> Vec<String> {
        self.local.iter().cloned().collect()
    }

    pub fn into_session_hashes(self) -> Vec<String> {
        self.local.into_iter().collect()
    }
}
