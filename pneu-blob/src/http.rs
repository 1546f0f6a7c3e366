use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::provider::SharedCredentialsProvider;
use futures::TryStreamExt;
use http::Method;
use tokio_util::io::StreamReader;

use crate::sign::sign_request;
use crate::{BlobError, BlobStore, BlobStream, UploadBody, Uploaded};

/// Transient failures are retried this many times on top of the first
/// attempt, sleeping `RETRY_BASE_DELAY * 2^attempt` between tries.
const RETRY_LIMIT: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Blob client over the IAM-fronted HTTP endpoints:
/// `GET /download-iam/{account}/{blobId}`,
/// `DELETE /delete-iam/{account}/{blobId}` and
/// `POST /jmap-iam/{account}` for the multipart upload flow.
pub struct HttpBlobStore {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) region: String,
    pub(crate) credentials: SharedCredentialsProvider,
}

impl HttpBlobStore {
    /// Build a client from the ambient AWS environment (region and
    /// credential chain), targeting `base_url` (the core API URL).
    pub async fn from_env(base_url: impl Into<String>) -> Result<Self, BlobError> {
        let sdk = aws_config::load_from_env().await;
        let region = sdk
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| BlobError::ServerFail("no deployment region configured".into()))?;
        let credentials = sdk
            .credentials_provider()
            .ok_or_else(|| BlobError::ServerFail("no credentials provider configured".into()))?;
        Ok(Self::new(base_url, region, credentials))
    }

    pub fn new(
        base_url: impl Into<String>,
        region: impl Into<String>,
        credentials: SharedCredentialsProvider,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            region: region.into(),
            credentials,
        }
    }

    fn download_url(&self, account: &str, blob_id: &str) -> String {
        format!("{}/download-iam/{}/{}", self.base_url, account, blob_id)
    }

    fn delete_url(&self, account: &str, blob_id: &str) -> String {
        format!("{}/delete-iam/{}/{}", self.base_url, account, blob_id)
    }

    pub(crate) fn jmap_url(&self, account: &str) -> String {
        format!("{}/jmap-iam/{}", self.base_url, account)
    }

    async fn build_signed(
        &self,
        method: &Method,
        url: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<reqwest::Request, BlobError> {
        let mut builder = http::Request::builder().method(method.clone()).uri(url);
        if let Some(ct) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, ct);
        }
        let mut req = builder
            .body(body.to_vec())
            .map_err(|e| BlobError::ServerFail(format!("request build: {}", e)))?;
        sign_request(&mut req, &self.credentials, &self.region).await?;
        reqwest::Request::try_from(req)
            .map_err(|e| BlobError::ServerFail(format!("request conversion: {}", e)))
    }

    /// Issue a signed request, retrying network errors and 5xx statuses.
    /// 4xx statuses are returned to the caller untouched: the request will
    /// not get better by repeating it.
    pub(crate) async fn send_signed(
        &self,
        method: Method,
        url: &str,
        body: &[u8],
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, BlobError> {
        let mut last_err = String::new();
        for attempt in 0..=RETRY_LIMIT {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
            }
            // Signed fresh on every attempt: the signature embeds the
            // request time.
            let req = self.build_signed(&method, url, body, content_type).await?;
            match self.http.execute(req).await {
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("status {}", resp.status());
                    tracing::debug!(url, attempt, status = %resp.status(), "retrying blob request");
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    last_err = e.to_string();
                    tracing::debug!(url, attempt, error = %e, "retrying blob request");
                }
            }
        }
        Err(BlobError::ServerFail(format!(
            "{} {} failed after {} attempts: {}",
            method,
            url,
            RETRY_LIMIT + 1,
            last_err
        )))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch(&self, account: &str, blob_id: &str) -> Result<Vec<u8>, BlobError> {
        tracing::trace!(account, blob_id, command = "blob_fetch");
        let url = self.download_url(account, blob_id);
        let resp = self.send_signed(Method::GET, &url, &[], None).await?;
        match resp.status() {
            s if s.is_success() => resp
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| BlobError::ServerFail(format!("reading blob body: {}", e))),
            http::StatusCode::NOT_FOUND => Err(BlobError::NotFound),
            http::StatusCode::FORBIDDEN => Err(BlobError::Forbidden),
            s => Err(BlobError::ServerFail(format!("blob fetch status {}", s))),
        }
    }

    async fn stream(&self, account: &str, blob_id: &str) -> Result<BlobStream, BlobError> {
        tracing::trace!(account, blob_id, command = "blob_stream");
        let url = self.download_url(account, blob_id);
        let req = self
            .build_signed(&Method::GET, &url, &[], None)
            .await?;
        let resp = self
            .http
            .execute(req)
            .await
            .map_err(|e| BlobError::ServerFail(format!("blob stream: {}", e)))?;
        match resp.status() {
            s if s.is_success() => {
                let stream = resp
                    .bytes_stream()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
                Ok(Box::pin(StreamReader::new(stream)))
            }
            http::StatusCode::NOT_FOUND => Err(BlobError::NotFound),
            http::StatusCode::FORBIDDEN => Err(BlobError::Forbidden),
            s => Err(BlobError::ServerFail(format!("blob stream status {}", s))),
        }
    }

    async fn delete(&self, account: &str, blob_id: &str) -> Result<(), BlobError> {
        tracing::trace!(account, blob_id, command = "blob_delete");
        let url = self.delete_url(account, blob_id);
        let resp = self.send_signed(Method::DELETE, &url, &[], None).await?;
        match resp.status() {
            // Deleting an absent blob is a success: the desired state holds.
            s if s.is_success() => Ok(()),
            http::StatusCode::NOT_FOUND => Ok(()),
            http::StatusCode::FORBIDDEN => Err(BlobError::Forbidden),
            s => Err(BlobError::ServerFail(format!("blob delete status {}", s))),
        }
    }

    async fn upload(
        &self,
        account: &str,
        content_type: &str,
        body: UploadBody,
    ) -> Result<Uploaded, BlobError> {
        self.upload_multipart(account, content_type, body).await
    }
}
