use std::time::Duration;

use http::Method;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::http::HttpBlobStore;
use crate::{BlobError, UploadBody, Uploaded, UPLOAD_PART_SIZE};

/// Capability URI of the presigned-part upload extension.
const JMAP_UPLOAD_PUT_URN: &str = "urn:ietf:params:jmap:blob:upload-put";

const PART_RETRY_LIMIT: u32 = 2;
const PART_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct JmapResponse {
    #[serde(rename = "methodResponses")]
    method_responses: Vec<(String, serde_json::Value, String)>,
}

/// `Blob/allocate` result: the blob id plus one presigned URL per
/// `UPLOAD_PART_SIZE` chunk, pre-allocated up to the maximum permitted
/// blob size.
#[derive(Debug, Deserialize)]
struct AllocatedUpload {
    id: String,
    parts: Vec<AllocatedPart>,
}

#[derive(Debug, Deserialize)]
struct AllocatedPart {
    #[serde(rename = "partNumber")]
    part_number: u32,
    url: String,
}

#[derive(Debug, Serialize)]
struct CompletedPart {
    #[serde(rename = "partNumber")]
    part_number: u32,
    etag: String,
}

impl HttpBlobStore {
    /// Two-step presigned upload: `Blob/allocate`, one PUT per 10 MiB
    /// chunk capturing the returned `ETag`, then `Blob/complete`. A single
    /// chunk buffer is reused across parts, so memory stays flat no matter
    /// how large the payload is.
    pub(crate) async fn upload_multipart(
        &self,
        account: &str,
        content_type: &str,
        mut body: UploadBody,
    ) -> Result<Uploaded, BlobError> {
        let allocated = self.allocate(account, content_type).await?;
        tracing::trace!(
            account,
            blob_id = %allocated.id,
            parts = allocated.parts.len(),
            command = "blob_upload_allocate"
        );

        let mut parts = allocated.parts.into_iter();
        let mut completed: Vec<CompletedPart> = Vec::new();
        let mut chunk = vec![0u8; UPLOAD_PART_SIZE];
        let mut total: u64 = 0;

        loop {
            let filled = read_chunk(&mut body, &mut chunk).await?;
            if filled == 0 {
                break;
            }
            let part = parts.next().ok_or_else(|| {
                BlobError::InvalidArguments(
                    "payload exceeds the maximum permitted blob size".into(),
                )
            })?;
            let etag = self
                .put_part(&part.url, content_type, &chunk[..filled])
                .await?;
            completed.push(CompletedPart {
                part_number: part.part_number,
                etag,
            });
            total += filled as u64;
            if filled < UPLOAD_PART_SIZE {
                break;
            }
        }

        self.complete(account, &allocated.id, &completed).await?;
        tracing::debug!(account, blob_id = %allocated.id, size = total, "uploaded blob");

        Ok(Uploaded {
            blob_id: allocated.id,
            size: total,
        })
    }

    async fn allocate(
        &self,
        account: &str,
        content_type: &str,
    ) -> Result<AllocatedUpload, BlobError> {
        let call = serde_json::json!({
            "using": [JMAP_UPLOAD_PUT_URN],
            "methodCalls": [["Blob/allocate", {
                "accountId": account,
                "create": { "c0": { "type": content_type, "size": 0, "multipart": true } },
            }, "c0"]],
        });
        let value = self.jmap_call(account, &call).await?;
        let created = value
            .get("created")
            .and_then(|c| c.get("c0"))
            .cloned()
            .ok_or_else(|| BlobError::ServerFail("Blob/allocate created nothing".into()))?;
        serde_json::from_value(created)
            .map_err(|e| BlobError::ServerFail(format!("Blob/allocate response shape: {}", e)))
    }

    async fn complete(
        &self,
        account: &str,
        id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), BlobError> {
        let call = serde_json::json!({
            "using": [JMAP_UPLOAD_PUT_URN],
            "methodCalls": [["Blob/complete", {
                "accountId": account,
                "id": id,
                "parts": parts,
            }, "c0"]],
        });
        self.jmap_call(account, &call).await.map(|_| ())
    }

    /// POST one JMAP request and return the first method response's
    /// arguments, mapping a method-level `error` response to a failure.
    async fn jmap_call(
        &self,
        account: &str,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, BlobError> {
        let url = self.jmap_url(account);
        let body = serde_json::to_vec(request)
            .map_err(|e| BlobError::ServerFail(format!("encoding jmap request: {}", e)))?;
        let resp = self
            .send_signed(Method::POST, &url, &body, Some("application/json"))
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(match status {
                http::StatusCode::NOT_FOUND => BlobError::NotFound,
                http::StatusCode::FORBIDDEN => BlobError::Forbidden,
                s => BlobError::ServerFail(format!("jmap endpoint status {}", s)),
            });
        }
        let parsed: JmapResponse = resp
            .json()
            .await
            .map_err(|e| BlobError::ServerFail(format!("decoding jmap response: {}", e)))?;
        let (name, args, _call_id) = parsed
            .method_responses
            .into_iter()
            .next()
            .ok_or_else(|| BlobError::ServerFail("empty jmap response".into()))?;
        if name == "error" {
            let kind = args.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
            let detail = args
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default();
            return Err(match kind {
                "invalidArguments" => BlobError::InvalidArguments(detail.to_string()),
                _ => BlobError::ServerFail(format!("jmap error {}: {}", kind, detail)),
            });
        }
        Ok(args)
    }

    /// PUT one chunk to its presigned URL. Presigned URLs carry their own
    /// authorization, so no SigV4 pass here; the transfer is idempotent
    /// and retried on transient failure.
    async fn put_part(
        &self,
        url: &str,
        content_type: &str,
        chunk: &[u8],
    ) -> Result<String, BlobError> {
        let mut last_err = String::new();
        for attempt in 0..=PART_RETRY_LIMIT {
            if attempt > 0 {
                tokio::time::sleep(PART_RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
            }
            let send = self
                .http
                .put(url)
                .header(http::header::CONTENT_TYPE, content_type)
                .body(chunk.to_vec())
                .send()
                .await;
            match send {
                Ok(resp) if resp.status().is_success() => {
                    let etag = resp
                        .headers()
                        .get(http::header::ETAG)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string());
                    // A part PUT without an ETag cannot be completed.
                    return etag.ok_or_else(|| {
                        BlobError::ServerFail("part upload response missing ETag".into())
                    });
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = format!("status {}", resp.status());
                }
                Ok(resp) => {
                    return Err(BlobError::ServerFail(format!(
                        "part upload status {}",
                        resp.status()
                    )));
                }
                Err(e) => last_err = e.to_string(),
            }
            tracing::debug!(attempt, error = %last_err, "retrying part upload");
        }
        Err(BlobError::ServerFail(format!(
            "part upload failed after {} attempts: {}",
            PART_RETRY_LIMIT + 1,
            last_err
        )))
    }
}

/// Fill `buf` from `body`, returning the number of bytes read; shorter
/// than `buf.len()` only at end of stream.
async fn read_chunk(
    body: &mut UploadBody,
    buf: &mut [u8],
) -> Result<usize, BlobError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = body.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
