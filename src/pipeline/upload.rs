//! Upload coordinator.
//!
//! Drains buffered results to the remote store and reconciles the duplicate
//! detector. Per-item rejections are isolated; a connection-level failure
//! aborts the rest of the batch and leaves those items Pending.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::worker::{BatchResult, UploadPayload};
use crate::dedup::DuplicateDetector;
use crate::metrics::{MetricsCollector, UploadOutcome};
use crate::remote::{RemoteError, RemoteStore};

/// Outcome of one [`UploadCoordinator::upload_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    /// True if the remote became unreachable part way through.
    pub aborted: bool,
}

pub struct UploadCoordinator {
    remote: Arc<dyn RemoteStore>,
    metrics: MetricsCollector,
}

impl UploadCoordinator {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    async fn upload_one(&self, hash: &str, bytes: &[u8], fields: &Value) -> Result<(), RemoteError> {
        let url = self.remote.upload_blob(hash, bytes).await?;
        let mut record = fields.clone();
        if let Value::Object(map) = &mut record {
            map.insert("blob_url".to_string(), Value::String(url));
        }
        self.remote.upsert_record(hash, &record).await
    }

    /// Uploads every result that carries a payload.
    ///
    /// Success moves the hash to Confirmed. A rejected item goes back to
    /// Session and is not re-queued. After a connection-level failure the
    /// current and remaining items count as failed and keep their state.
    pub async fn upload_batch(
        &self,
        results: &[BatchResult],
        detector: &mut DuplicateDetector,
    ) -> UploadReport {
        let mut report = UploadReport::default();
        let items: Vec<(&str, &UploadPayload)> = results
            .iter()
            .filter_map(|r| Some((r.digest()?, r.payload.as_ref()?)))
            .collect();

        for (position, (hash, payload)) in items.iter().enumerate() {
            match self.upload_one(hash, &payload.bytes, &payload.fields).await {
                Ok(()) => {
                    detector.mark_uploaded(hash);
                    report.uploaded += 1;
                }
                Err(e) if e.is_connection_level() => {
                    let remaining = items.len() - position;
                    warn!(
                        remote = %self.remote.describe(),
                        error = %e,
                        remaining,
                        "Remote store unreachable, aborting upload batch"
                    );
                    detector.mark_remote_unavailable();
                    report.failed += remaining;
                    report.aborted = true;
                    self.metrics.record_uploads(UploadOutcome::Aborted, remaining);
                    break;
                }
                Err(e) => {
                    warn!(hash, error = %e, "Upload rejected");
                    detector.mark_upload_failed(hash);
                    report.failed += 1;
                    self.metrics.record_uploads(UploadOutcome::Rejected, 1);
                }
            }
        }

        self.metrics
            .record_uploads(UploadOutcome::Uploaded, report.uploaded);
        info!(
            uploaded = report.uploaded,
            failed = report.failed,
            aborted = report.aborted,
            "Upload batch finished"
        );
        report
    }
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("remote", &self.remote.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Circuit, Instruction};
    use crate::dedup::HashRecordState;
    use crate::remote::InMemoryRemoteStore;

    /// Buffers `n` distinct circuits as Pending and returns matching results.
    fn pending_results(detector: &mut DuplicateDetector, n: usize) -> Vec<BatchResult> {
        (0..n)
            .map(|i| {
                let mut c = Circuit::new(format!("c{}", i), i + 1, 0);
                c.push(Instruction::new("h", vec![i])).unwrap();
                let outcome = detector.check(&c);
                detector.mark_pending_upload(&outcome.hash.digest);

                let mut result = BatchResult::new(0, i as u64, 0);
                result.success = true;
                result.written = true;
                result.hash = Some(outcome.hash);
                result.payload = Some(UploadPayload {
                    bytes: serde_json::to_vec(&c).unwrap(),
                    fields: serde_json::json!({"n_qubits": i + 1}),
                });
                result
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_uploaded() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let coordinator = UploadCoordinator::new(remote.clone());
        let mut detector = DuplicateDetector::in_memory();
        let results = pending_results(&mut detector, 3);

        let report = coordinator.upload_batch(&results, &mut detector).await;
        assert_eq!(report, UploadReport { uploaded: 3, failed: 0, aborted: false });
        assert!(detector.remote_connected());
        for result in &results {
            let hash = result.digest().unwrap();
            assert_eq!(detector.state_of(hash), Some(HashRecordState::Confirmed));
            assert!(remote.contains(hash));
            assert!(remote.record(hash).unwrap()["blob_url"].is_string());
        }
    }

    #[tokio::test]
    async fn test_rejected_item_is_isolated() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let coordinator = UploadCoordinator::new(remote.clone());
        let mut detector = DuplicateDetector::in_memory();
        let results = pending_results(&mut detector, 3);
        let rejected = results[1].digest().unwrap().to_string();
        remote.reject_hash(rejected.clone());

        let report = coordinator.upload_batch(&results, &mut detector).await;
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.aborted);
        assert_eq!(detector.state_of(&rejected), Some(HashRecordState::Session));
        assert_eq!(
            detector.state_of(results[2].digest().unwrap()),
            Some(HashRecordState::Confirmed)
        );
    }

    #[tokio::test]
    async fn test_connection_loss_aborts_remaining() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.fail_after_uploads(1);
        let coordinator = UploadCoordinator::new(remote.clone());
        let mut detector = DuplicateDetector::in_memory();
        let results = pending_results(&mut detector, 4);

        let report = coordinator.upload_batch(&results, &mut detector).await;
        assert_eq!(report, UploadReport { uploaded: 1, failed: 3, aborted: true });
        assert_eq!(
            detector.state_of(results[0].digest().unwrap()),
            Some(HashRecordState::Confirmed)
        );
        for result in &results[1..] {
            assert_eq!(
                detector.state_of(result.digest().unwrap()),
                Some(HashRecordState::Pending)
            );
        }
        // The outage is noticed once; the rest are not attempted.
        assert_eq!(remote.upload_calls(), 2);
        assert!(!detector.remote_connected());
    }

    #[tokio::test]
    async fn test_results_without_payload_are_skipped() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let coordinator = UploadCoordinator::new(remote.clone());
        let mut detector = DuplicateDetector::in_memory();
        let mut results = pending_results(&mut detector, 2);
        results[0].payload = None;

        let report = coordinator.upload_batch(&results, &mut detector).await;
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(remote.upload_calls(), 1);
    }
}
