pub mod http;
pub mod in_memory;
pub mod range;
mod sign;
mod upload;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use range::RangeRef;

/// Chunk size of the multipart presigned upload flow. The server
/// pre-allocates one signed URL per chunk of this size.
pub const UPLOAD_PART_SIZE: usize = 10 * 1024 * 1024;

/// A streaming read handle over a blob's bytes. The caller owns it and
/// drives it to completion (or drops it to abandon the transfer).
pub type BlobStream = Pin<Box<dyn AsyncRead + Send>>;

/// Payload handed to [`BlobStore::upload`].
pub type UploadBody = Pin<Box<dyn AsyncRead + Send>>;

pub type DynBlobStore = Arc<dyn BlobStore>;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found")]
    NotFound,
    #[error("access to blob denied")]
    Forbidden,
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("blob endpoint failure: {0}")]
    ServerFail(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub blob_id: String,
    /// Number of payload octets streamed into the blob.
    pub size: u64,
}

/// Contract over the content-addressed blob endpoint.
///
/// All operations accept either an opaque blob id or a range blob
/// identifier `<blobId>,<start>,<end>` (see [`range`]); the endpoint
/// serves bytes `[start, end)` of the underlying blob for the latter.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the whole blob into memory. Retries transient failures with
    /// bounded exponential backoff.
    async fn fetch(&self, account: &str, blob_id: &str) -> Result<Vec<u8>, BlobError>;

    /// Open a streaming read handle. No internal retry: a byte stream is
    /// not idempotent, the caller owns the restart policy.
    async fn stream(&self, account: &str, blob_id: &str) -> Result<BlobStream, BlobError>;

    /// Delete a blob. Deleting an absent blob succeeds.
    async fn delete(&self, account: &str, blob_id: &str) -> Result<(), BlobError>;

    /// Stream `body` into a newly allocated blob and return its id along
    /// with the number of octets written.
    async fn upload(
        &self,
        account: &str,
        content_type: &str,
        body: UploadBody,
    ) -> Result<Uploaded, BlobError>;
}
