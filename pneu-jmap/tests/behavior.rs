mod common;

use common::*;
use serde_json::json;

use pneu_blob::BlobStore;
use pneu_gc::QueueRecord;
use pneu_store::ObjectType;

#[tokio::test]
async fn import_then_get_round_trip() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    let raw = simple_message();
    engine.seed_blob("b-raw", &raw);

    let created = engine.import_one("b-raw", "inbox").await;
    assert_eq!(created["blobId"], "b-raw");
    assert_eq!(created["size"], raw.len() as u64);
    let email_id = created["id"].as_str().unwrap().to_string();

    let response = engine
        .get
        .handle(ACCOUNT, &json!({ "ids": [email_id] }))
        .await
        .unwrap();
    assert_eq!(response.account_id, ACCOUNT);
    assert_eq!(response.state, "1");
    assert!(response.not_found.is_empty());
    assert_eq!(response.list.len(), 1);

    let email = &response.list[0];
    assert_eq!(email["id"], json!(email_id));
    assert_eq!(email["blobId"], "b-raw");
    assert_eq!(email["size"], raw.len() as u64);
    assert_eq!(email["mailboxIds"], json!({ "inbox": true }));
    assert_eq!(email["keywords"], json!({}));
    assert_eq!(email["subject"], "Hello");
    assert_eq!(email["sentAt"], "2024-01-20T10:00:00Z");
    assert_eq!(email["preview"], "Body");
}

#[tokio::test]
async fn projection_is_filtered_and_id_always_present() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-raw", &simple_message());
    let created = engine.import_one("b-raw", "inbox").await;
    let email_id = created["id"].as_str().unwrap();

    let response = engine
        .get
        .handle(
            ACCOUNT,
            &json!({
                "ids": [email_id],
                "properties": ["subject", "from", "messageId"],
            }),
        )
        .await
        .unwrap();
    let email = response.list[0].as_object().unwrap();

    // Exactly the requested keys plus id, nothing else.
    let mut keys: Vec<_> = email.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["from", "id", "messageId", "subject"]);
    assert_eq!(email["subject"], "Hello");
    assert_eq!(email["from"], json!([{ "name": "", "email": "a@e.com" }]));
    assert_eq!(email["messageId"], json!(["m1@e.com"]));
}

#[tokio::test]
async fn null_and_empty_conventions() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-raw", &simple_message());
    let created = engine.import_one("b-raw", "inbox").await;
    let email_id = created["id"].as_str().unwrap();

    let response = engine
        .get
        .handle(
            ACCOUNT,
            &json!({
                "ids": [email_id],
                "properties": ["cc", "bcc", "sender", "replyTo", "inReplyTo", "keywords"],
            }),
        )
        .await
        .unwrap();
    let email = &response.list[0];
    assert_eq!(email["cc"], json!([]));
    assert_eq!(email["replyTo"], json!([]));
    assert_eq!(email["sender"], json!(null));
    assert_eq!(email["bcc"], json!(null));
    assert_eq!(email["inReplyTo"], json!(null));
    assert_eq!(email["keywords"], json!({}));
}

#[tokio::test]
async fn base64_attachment_round_trip() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-mixed", &mixed_message_with_attachment());

    let created = engine.import_one("b-mixed", "inbox").await;
    assert_eq!(engine.blobs.upload_count(), 1);
    let email_id = created["id"].as_str().unwrap();

    let response = engine
        .get
        .handle(
            ACCOUNT,
            &json!({
                "ids": [email_id],
                "properties": ["hasAttachment", "attachments", "textBody"],
            }),
        )
        .await
        .unwrap();
    let email = &response.list[0];
    assert_eq!(email["hasAttachment"], true);

    let attachments = email["attachments"].as_array().unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0]["partId"], "2");
    assert_eq!(attachments[0]["name"], "hello.bin");
    assert_eq!(attachments[0]["size"], 11);

    let attachment_blob = attachments[0]["blobId"].as_str().unwrap();
    let bytes = engine.blobs.fetch(ACCOUNT, attachment_blob).await.unwrap();
    assert_eq!(bytes, b"Hello World".to_vec());
}

#[tokio::test]
async fn body_values_with_truncation() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-raw", &simple_message());
    let created = engine.import_one("b-raw", "inbox").await;
    let email_id = created["id"].as_str().unwrap();

    let response = engine
        .get
        .handle(
            ACCOUNT,
            &json!({
                "ids": [email_id],
                "properties": ["bodyValues", "textBody"],
                "fetchTextBodyValues": true,
            }),
        )
        .await
        .unwrap();
    let value = &response.list[0]["bodyValues"]["1"];
    assert_eq!(value["value"], "Body");
    assert_eq!(value["isTruncated"], false);
    assert_eq!(value["isEncodingProblem"], false);

    let truncated = engine
        .get
        .handle(
            ACCOUNT,
            &json!({
                "ids": [email_id],
                "properties": ["bodyValues"],
                "fetchTextBodyValues": true,
                "maxBodyValueBytes": 3,
            }),
        )
        .await
        .unwrap();
    let value = &truncated.list[0]["bodyValues"]["1"];
    assert_eq!(value["value"], "Bod");
    assert_eq!(value["isTruncated"], true);

    // Non-positive limits mean the server maximum.
    let unlimited = engine
        .get
        .handle(
            ACCOUNT,
            &json!({
                "ids": [email_id],
                "properties": ["bodyValues"],
                "fetchTextBodyValues": true,
                "maxBodyValueBytes": 0,
            }),
        )
        .await
        .unwrap();
    assert_eq!(unlimited.list[0]["bodyValues"]["1"]["value"], "Body");
}

#[tokio::test]
async fn header_properties_against_raw_blob() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-raw", &simple_message());
    let created = engine.import_one("b-raw", "inbox").await;
    let email_id = created["id"].as_str().unwrap();

    let response = engine
        .get
        .handle(
            ACCOUNT,
            &json!({
                "ids": [email_id],
                "properties": [
                    "header:Subject:asText",
                    "header:From:asAddresses",
                    "header:X-Custom",
                    "header:X-Custom:all",
                ],
            }),
        )
        .await
        .unwrap();
    let email = &response.list[0];
    assert_eq!(email["header:Subject:asText"], "Hello");
    assert_eq!(
        email["header:From:asAddresses"],
        json!([{ "name": "", "email": "a@e.com" }])
    );
    assert_eq!(email["header:X-Custom"], json!(null));
    assert_eq!(email["header:X-Custom:all"], json!([]));
}

#[tokio::test]
async fn thread_inheritance() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;

    engine.seed_blob("b-parent", &simple_message());
    let parent = engine.import_one("b-parent", "inbox").await;
    let thread_state_after_parent = engine
        .tracker
        .current_state(ACCOUNT, ObjectType::Thread)
        .await
        .unwrap();

    engine.seed_blob("b-reply", &reply_message("m2@e.com", "m1@e.com"));
    let reply = engine.import_one("b-reply", "inbox").await;

    assert_eq!(reply["threadId"], parent["threadId"]);
    assert_ne!(reply["id"], parent["id"]);

    // The reply's thread change is an update of the joined thread, not a
    // new thread.
    let changes = engine
        .tracker
        .changes_since(ACCOUNT, ObjectType::Thread, thread_state_after_parent)
        .await
        .unwrap();
    assert!(changes.created.is_empty());
    assert_eq!(
        changes.updated,
        vec![parent["threadId"].as_str().unwrap().to_string()]
    );

    // An unrelated import founds its own thread.
    engine.seed_blob("b-other", &reply_message("m3@e.com", "never-seen@e.com"));
    let other = engine.import_one("b-other", "inbox").await;
    assert_eq!(other["threadId"], other["id"]);
}

#[tokio::test]
async fn partial_batch_failure_isolates_entries() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-1", &simple_message());
    engine.seed_blob("b-3", &reply_message("m9@e.com", "m1@e.com"));

    let args = json!({
        "emails": {
            "r1": { "blobId": "b-1", "mailboxIds": { "inbox": true } },
            "r2": { "blobId": "b-missing", "mailboxIds": { "inbox": true } },
            "r3": { "blobId": "b-3", "mailboxIds": { "inbox": true } },
        },
    });
    let response = engine.import.handle(ACCOUNT, &args).await.unwrap();

    assert_eq!(response.created.len(), 2);
    assert!(response.created.contains_key("r1"));
    assert!(response.created.contains_key("r3"));
    let failure = serde_json::to_value(&response.not_created["r2"]).unwrap();
    assert_eq!(failure["type"], "blobNotFound");

    // The email counter advanced by exactly the two successes.
    let state = engine
        .tracker
        .current_state(ACCOUNT, ObjectType::Email)
        .await
        .unwrap();
    assert_eq!(state, 2);

    // Mailbox counters saw two unread imports.
    assert_eq!(
        engine.repo.mailbox_counts(ACCOUNT, "inbox").await.unwrap(),
        (2, 2)
    );
}

#[tokio::test]
async fn invalid_mailbox_rejects_entry() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-raw", &simple_message());

    let args = json!({
        "emails": {
            "r1": { "blobId": "b-raw", "mailboxIds": { "nope": true } },
            "r2": { "blobId": "b-raw", "mailboxIds": {} },
        },
    });
    let response = engine.import.handle(ACCOUNT, &args).await.unwrap();
    assert!(response.created.is_empty());
    for reference in ["r1", "r2"] {
        let failure = serde_json::to_value(&response.not_created[reference]).unwrap();
        assert_eq!(failure["type"], "invalidMailboxId", "entry {}", reference);
    }
}

#[tokio::test]
async fn soft_delete_hides_from_get() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-raw", &simple_message());
    let created = engine.import_one("b-raw", "inbox").await;
    let email_id = created["id"].as_str().unwrap();

    engine
        .repo
        .mark_deleted(ACCOUNT, email_id, chrono::Utc::now())
        .await
        .unwrap();

    let response = engine
        .get
        .handle(ACCOUNT, &json!({ "ids": [email_id] }))
        .await
        .unwrap();
    assert!(response.list.is_empty());
    assert_eq!(response.not_found, vec![email_id.to_string()]);
}

#[tokio::test]
async fn soft_delete_to_hard_delete_to_blob_gc() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-mixed", &mixed_message_with_attachment());
    let created = engine.import_one("b-mixed", "inbox").await;
    let email_id = created["id"].as_str().unwrap().to_string();

    let uploaded: Vec<String> = engine
        .blobs
        .deleted()
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    assert!(uploaded.is_empty());

    // Soft delete, then run the change-stream observer.
    engine
        .repo
        .mark_deleted(ACCOUNT, &email_id, chrono::Utc::now())
        .await
        .unwrap();
    let outcome = engine
        .observer
        .handle_batch(&[engine.soft_delete_event(&email_id)])
        .await;
    assert!(outcome.all_ok());
    assert!(engine
        .repo
        .get_email(ACCOUNT, &email_id)
        .await
        .unwrap()
        .is_none());

    // One queue message carrying the raw blob plus the decoded part.
    let body = engine.queue.pop().expect("cleanup message");
    assert!(engine.queue.pop().is_none());
    let message: pneu_gc::BlobDeleteMessage = serde_json::from_str(&body).unwrap();
    assert_eq!(message.blob_ids.len(), 2);
    assert_eq!(message.blob_ids[0], "b-mixed");
    assert!(message.blob_ids[1].starts_with("p-"));

    // The queue consumer issues one DELETE per blob.
    let outcome = engine
        .consumer
        .handle_batch(&[QueueRecord {
            id: "q1".into(),
            body,
        }])
        .await;
    assert!(outcome.all_ok());
    let deleted: Vec<String> = engine
        .blobs
        .deleted()
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    assert_eq!(deleted.len(), 2);
    assert!(deleted.contains(&"b-mixed".to_string()));
    assert!(!engine.blobs.contains(ACCOUNT, "b-mixed"));
}

#[tokio::test]
async fn invalid_email_compensates_uploaded_parts() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    // Truncated base64 payload: the decode fails after the part upload
    // already started.
    let raw = concat!(
        "Content-Type: multipart/mixed; boundary=xyz\r\n",
        "\r\n",
        "--xyz\r\n",
        "Content-Type: application/octet-stream\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "SGVsb\r\n",
        "--xyz--\r\n"
    );
    engine.seed_blob("b-bad", raw);

    let args = json!({
        "emails": { "r1": { "blobId": "b-bad", "mailboxIds": { "inbox": true } } },
    });
    let response = engine.import.handle(ACCOUNT, &args).await.unwrap();
    let failure = serde_json::to_value(&response.not_created["r1"]).unwrap();
    assert_eq!(failure["type"], "invalidEmail");

    // The orphaned part blob was queued for cleanup; the raw blob was
    // not.
    let body = engine.queue.pop().expect("compensation message");
    let message: pneu_gc::BlobDeleteMessage = serde_json::from_str(&body).unwrap();
    assert_eq!(message.blob_ids.len(), 1);
    assert!(message.blob_ids[0].starts_with("p-"));
    assert_ne!(message.blob_ids[0], "b-bad");
}

#[tokio::test]
async fn summary_can_stand_in_for_preview() {
    let engine = engine();
    engine.seed_mailbox("inbox").await;
    engine.seed_blob("b-raw", &simple_message());
    let created = engine.import_one("b-raw", "inbox").await;
    let email_id = created["id"].as_str().unwrap();

    engine
        .repo
        .update_summary(common::ACCOUNT, email_id, "the gist of it")
        .await
        .unwrap();

    // Default reader keeps the parsed preview.
    let response = engine
        .get
        .handle(ACCOUNT, &json!({ "ids": [email_id], "properties": ["preview"] }))
        .await
        .unwrap();
    assert_eq!(response.list[0]["preview"], "Body");

    // A reader configured to prefer summaries serves it instead.
    let summarized = pneu_jmap::EmailGet::new(
        engine.repo.clone(),
        engine.tracker.clone(),
        engine.blobs.clone(),
    )
    .with_summary_overwrites_preview(true);
    let response = summarized
        .handle(ACCOUNT, &json!({ "ids": [email_id], "properties": ["preview"] }))
        .await
        .unwrap();
    assert_eq!(response.list[0]["preview"], "the gist of it");
}

#[tokio::test]
async fn get_rejects_bad_arguments() {
    let engine = engine();
    let missing_ids = engine.get.handle(ACCOUNT, &json!({})).await;
    assert!(missing_ids.is_err());

    let bad_form = engine
        .get
        .handle(
            ACCOUNT,
            &json!({ "ids": [], "properties": ["header:Subject:asAddresses"] }),
        )
        .await;
    assert!(bad_form.is_err());

    let unknown_property = engine
        .get
        .handle(ACCOUNT, &json!({ "ids": [], "properties": ["wat"] }))
        .await;
    assert!(unknown_property.is_err());
}
