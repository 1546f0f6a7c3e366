use pneu_blob::DynBlobStore;

use crate::queue::BlobDeleteMessage;
use crate::BatchOutcome;

/// One delivered queue record.
#[derive(Debug, Clone)]
pub struct QueueRecord {
    pub id: String,
    pub body: String,
}

/// Drains the blob-deletion queue with at-least-once semantics: a
/// record is acknowledged only when every one of its blob deletes
/// succeeded, otherwise it is reported failed and redelivered.
pub struct BlobDeleteConsumer {
    blobs: DynBlobStore,
}

impl BlobDeleteConsumer {
    pub fn new(blobs: DynBlobStore) -> Self {
        Self { blobs }
    }

    pub async fn handle_batch(&self, records: &[QueueRecord]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for record in records {
            if let Err(error) = self.handle_record(record).await {
                tracing::warn!(record = %record.id, %error, "blob delete record failed");
                outcome.failed_ids.push(record.id.clone());
            }
        }
        outcome
    }

    async fn handle_record(&self, record: &QueueRecord) -> Result<(), String> {
        let message: BlobDeleteMessage =
            serde_json::from_str(&record.body).map_err(|e| format!("undecodable envelope: {}", e))?;
        for blob_id in &message.blob_ids {
            self.blobs
                .delete(&message.account_id, blob_id)
                .await
                .map_err(|e| format!("deleting {}: {}", blob_id, e))?;
        }
        tracing::debug!(
            account = %message.account_id,
            blobs = message.blob_ids.len(),
            "deleted blobs"
        );
        Ok(())
    }
}
