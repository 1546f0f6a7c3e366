use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::RngCore;
use tokio::io::AsyncReadExt;

use crate::range::RangeRef;
use crate::{BlobError, BlobStore, BlobStream, UploadBody, Uploaded};

/// In-memory twin of the HTTP blob client, honoring the same contract
/// including range blob identifiers. Intended for tests and the local
/// `inspect` tooling; everything lives in process memory and is gone when
/// the store is dropped.
#[derive(Debug, Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: AtomicUsize,
    deletes: Mutex<Vec<(String, String)>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob under a caller-chosen id.
    pub fn insert(&self, account: &str, blob_id: &str, bytes: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .insert((account.to_string(), blob_id.to_string()), bytes);
    }

    pub fn contains(&self, account: &str, blob_id: &str) -> bool {
        self.blobs
            .lock()
            .unwrap()
            .contains_key(&(account.to_string(), blob_id.to_string()))
    }

    /// Number of `upload` calls served so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Every `(account, blobId)` pair that was deleted, in call order.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }

    fn resolve(&self, account: &str, blob_id: &str) -> Result<Vec<u8>, BlobError> {
        let blobs = self
            .blobs
            .lock()
            .or(Err(BlobError::ServerFail("blob lock poisoned".into())))?;
        if RangeRef::is_range_id(blob_id) {
            let range: RangeRef = blob_id
                .parse()
                .map_err(|e: &str| BlobError::InvalidArguments(e.to_string()))?;
            let bytes = blobs
                .get(&(account.to_string(), range.blob_id.clone()))
                .ok_or(BlobError::NotFound)?;
            // Out-of-range offsets clamp to a short read.
            let start = (range.start as usize).min(bytes.len());
            let end = (range.end as usize).min(bytes.len());
            Ok(bytes[start..end.max(start)].to_vec())
        } else {
            blobs
                .get(&(account.to_string(), blob_id.to_string()))
                .cloned()
                .ok_or(BlobError::NotFound)
        }
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn fetch(&self, account: &str, blob_id: &str) -> Result<Vec<u8>, BlobError> {
        tracing::trace!(account, blob_id, command = "blob_fetch");
        self.resolve(account, blob_id)
    }

    async fn stream(&self, account: &str, blob_id: &str) -> Result<BlobStream, BlobError> {
        tracing::trace!(account, blob_id, command = "blob_stream");
        let bytes = self.resolve(account, blob_id)?;
        Ok(Box::pin(Cursor::new(bytes)))
    }

    async fn delete(&self, account: &str, blob_id: &str) -> Result<(), BlobError> {
        tracing::trace!(account, blob_id, command = "blob_delete");
        self.blobs
            .lock()
            .or(Err(BlobError::ServerFail("blob lock poisoned".into())))?
            .remove(&(account.to_string(), blob_id.to_string()));
        self.deletes
            .lock()
            .or(Err(BlobError::ServerFail("blob lock poisoned".into())))?
            .push((account.to_string(), blob_id.to_string()));
        Ok(())
    }

    async fn upload(
        &self,
        account: &str,
        _content_type: &str,
        mut body: UploadBody,
    ) -> Result<Uploaded, BlobError> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await?;

        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let blob_id = format!("p-{}", hex::encode(raw));

        self.uploads.fetch_add(1, Ordering::Relaxed);
        let size = bytes.len() as u64;
        self.insert(account, &blob_id, bytes);
        tracing::trace!(account, blob_id = %blob_id, size, command = "blob_upload");

        Ok(Uploaded { blob_id, size })
    }
}
