#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use pneu_blob::in_memory::MemBlobStore;
use pneu_gc::{BlobDeleteConsumer, MemQueue, SoftDeleteObserver};
use pneu_jmap::{EmailGet, EmailImport};
use pneu_store::memory::MemStore;
use pneu_store::state::DEFAULT_STATE_TTL_DAYS;
use pneu_store::{EmailRepo, StateTracker};

pub const ACCOUNT: &str = "alice";
pub const API_URL: &str = "https://core.example";

/// The whole engine wired over in-memory backends.
pub struct Engine {
    pub store: Arc<MemStore>,
    pub blobs: Arc<MemBlobStore>,
    pub queue: Arc<MemQueue>,
    pub repo: EmailRepo,
    pub tracker: StateTracker,
    pub import: EmailImport,
    pub get: EmailGet,
    pub observer: SoftDeleteObserver,
    pub consumer: BlobDeleteConsumer,
}

pub fn engine() -> Engine {
    let store = Arc::new(MemStore::new());
    let blobs = Arc::new(MemBlobStore::new());
    let queue = Arc::new(MemQueue::new());
    let repo = EmailRepo::new(store.clone());
    let tracker = StateTracker::new(store.clone(), DEFAULT_STATE_TTL_DAYS);
    let import = EmailImport::new(
        repo.clone(),
        tracker.clone(),
        blobs.clone(),
        queue.clone(),
        API_URL,
    );
    let get = EmailGet::new(repo.clone(), tracker.clone(), blobs.clone());
    let observer = SoftDeleteObserver::new(repo.clone(), tracker.clone(), queue.clone(), API_URL);
    let consumer = BlobDeleteConsumer::new(blobs.clone());
    Engine {
        store,
        blobs,
        queue,
        repo,
        tracker,
        import,
        get,
        observer,
        consumer,
    }
}

impl Engine {
    pub async fn seed_mailbox(&self, mailbox_id: &str) {
        self.repo.create_mailbox(ACCOUNT, mailbox_id).await.unwrap();
    }

    pub fn seed_blob(&self, blob_id: &str, raw: &str) {
        self.blobs.insert(ACCOUNT, blob_id, raw.as_bytes().to_vec());
    }

    /// Import one blob into one mailbox, expecting success; returns the
    /// created entry.
    pub async fn import_one(&self, blob_id: &str, mailbox_id: &str) -> Value {
        let args = json!({
            "emails": { "r0": { "blobId": blob_id, "mailboxIds": { mailbox_id: true } } },
        });
        let response = self.import.handle(ACCOUNT, &args).await.unwrap();
        assert!(
            response.not_created.is_empty(),
            "unexpected notCreated: {:?}",
            response.not_created
        );
        serde_json::to_value(response.created.get("r0").expect("created entry")).unwrap()
    }

    /// The soft-delete change-stream event for an email of this account.
    pub fn soft_delete_event(&self, email_id: &str) -> pneu_gc::RecordEvent {
        pneu_gc::RecordEvent {
            id: format!("ev-{}", email_id),
            kind: pneu_gc::StreamEventKind::Modify,
            old_image: Some(json!({"accountId": ACCOUNT, "emailId": email_id})),
            new_image: Some(json!({
                "accountId": ACCOUNT,
                "emailId": email_id,
                "deletedAt": "2026-02-01T00:00:00Z",
            })),
        }
    }
}

pub fn simple_message() -> String {
    concat!(
        "From: a@e.com\r\n",
        "To: b@e.com\r\n",
        "Subject: Hello\r\n",
        "Date: Sat, 20 Jan 2024 10:00:00 +0000\r\n",
        "Message-ID: <m1@e.com>\r\n",
        "\r\n",
        "Body"
    )
    .to_string()
}

pub fn mixed_message_with_attachment() -> String {
    concat!(
        "From: a@e.com\r\n",
        "Subject: Files\r\n",
        "Message-ID: <files@e.com>\r\n",
        "Content-Type: multipart/mixed; boundary=xyz\r\n",
        "\r\n",
        "--xyz\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Hello text\r\n",
        "--xyz\r\n",
        "Content-Type: application/octet-stream\r\n",
        "Content-Disposition: attachment; filename=hello.bin\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "SGVsbG8gV29ybGQ=\r\n",
        "--xyz--\r\n"
    )
    .to_string()
}

pub fn reply_message(message_id: &str, in_reply_to: &str) -> String {
    format!(
        concat!(
            "From: b@e.com\r\n",
            "To: a@e.com\r\n",
            "Subject: Re: hi\r\n",
            "Message-ID: <{}>\r\n",
            "In-Reply-To: <{}>\r\n",
            "\r\n",
            "A reply"
        ),
        message_id, in_reply_to
    )
}
