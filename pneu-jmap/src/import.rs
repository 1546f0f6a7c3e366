use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use pneu_blob::{BlobError, DynBlobStore};
use pneu_gc::{BlobDeleteMessage, DynDeleteQueue};
use pneu_mime::parse_message;
use pneu_store::{
    gen_email_id, ChangeType, EmailRecord, EmailRepo, ObjectType, StateTracker, StoreError,
};

use crate::args::Args;
use crate::error::MethodError;

/// Rebuild-and-retry budget when a concurrent writer wins the state
/// counter race.
const STATE_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEmail {
    pub id: String,
    pub blob_id: String,
    pub thread_id: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub account_id: String,
    pub created: BTreeMap<String, CreatedEmail>,
    pub not_created: BTreeMap<String, MethodError>,
}

/// `Email/import`: fetch the raw blob, parse it as a stream (uploading
/// decoded part payloads on the way), resolve the thread, and commit
/// record, projections, mailbox counters and three state sequences in
/// one atomic write. Uploaded part blobs are compensated when the write
/// cannot happen.
pub struct EmailImport {
    repo: EmailRepo,
    tracker: StateTracker,
    blobs: DynBlobStore,
    queue: DynDeleteQueue,
    api_url: String,
}

impl EmailImport {
    pub fn new(
        repo: EmailRepo,
        tracker: StateTracker,
        blobs: DynBlobStore,
        queue: DynDeleteQueue,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            tracker,
            blobs,
            queue,
            api_url: api_url.into(),
        }
    }

    pub async fn handle(
        &self,
        caller_account: &str,
        args_value: &Value,
    ) -> Result<ImportResponse, MethodError> {
        let args = Args::new(args_value)
            .ok_or_else(|| MethodError::invalid_arguments("arguments must be an object"))?;
        let account = args.str_or("accountId", caller_account).to_string();
        let emails = args
            .object("emails")
            .ok_or_else(|| MethodError::invalid_arguments("emails must be an object"))?;

        let mut created = BTreeMap::new();
        let mut not_created = BTreeMap::new();
        for (reference, entry) in emails {
            // Entries fail independently; the batch always reports both
            // sides.
            match self.import_one(&account, entry).await {
                Ok(email) => {
                    created.insert(reference.clone(), email);
                }
                Err(error) => {
                    not_created.insert(reference.clone(), error);
                }
            }
        }

        Ok(ImportResponse {
            account_id: account,
            created,
            not_created,
        })
    }

    async fn import_one(&self, account: &str, entry: &Value) -> Result<CreatedEmail, MethodError> {
        let entry = Args::new(entry)
            .ok_or_else(|| MethodError::invalid_arguments("import entry must be an object"))?;

        let blob_id = entry
            .opt_str("blobId")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MethodError::invalid_arguments("blobId must be a non-empty string"))?;

        let mailbox_ids = id_set(&entry, "mailboxIds");
        if mailbox_ids.is_empty() {
            return Err(MethodError::invalid_mailbox_id(
                "email must belong to at least one mailbox",
            ));
        }
        for mailbox_id in &mailbox_ids {
            match self.repo.mailbox_exists(account, mailbox_id).await {
                Ok(true) => (),
                Ok(false) => {
                    return Err(MethodError::invalid_mailbox_id(format!(
                        "mailbox {} does not exist",
                        mailbox_id
                    )))
                }
                Err(e) => return Err(MethodError::server_fail(e)),
            }
        }

        let keywords = id_set(&entry, "keywords");
        let received_at = match entry.opt_str("receivedAt") {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|_| {
                    MethodError::invalid_arguments("receivedAt must be an RFC 3339 date")
                })?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        let stream = self.blobs.stream(account, blob_id).await.map_err(|e| match e {
            BlobError::NotFound => {
                MethodError::blob_not_found(format!("blob {} not found", blob_id))
            }
            other => MethodError::server_fail(other),
        })?;

        let parsed = match parse_message(self.blobs.clone(), account, blob_id, stream).await {
            Ok(parsed) => parsed,
            Err(abort) => {
                self.compensate(account, &abort.uploaded_blobs).await;
                return Err(MethodError::invalid_email(format!(
                    "unparsable message: {}",
                    abort.error
                )));
            }
        };

        let email_id = gen_email_id().to_string();
        let (thread_id, thread_change) = self.resolve_thread(account, &email_id, &parsed.in_reply_to).await;

        // Kept aside: on a failed write these decoded-part blobs are the
        // compensation set (never the original raw blob).
        let uploaded_parts = parsed.uploaded_part_blobs.clone();
        let email = EmailRecord::from_parsed(
            account,
            &email_id,
            &thread_id,
            blob_id,
            mailbox_ids.clone(),
            keywords,
            received_at,
            parsed,
        );

        match self.commit(&email, thread_change).await {
            Ok(()) => {
                tracing::debug!(account, email_id = %email.email_id, thread_id = %email.thread_id, "imported email");
                Ok(CreatedEmail {
                    id: email.email_id,
                    blob_id: email.blob_id,
                    thread_id: email.thread_id,
                    size: email.size,
                })
            }
            Err(error) => {
                self.compensate(account, &uploaded_parts).await;
                Err(MethodError::server_fail(error))
            }
        }
    }

    /// First In-Reply-To target wins: join the parent's thread if it
    /// resolves, otherwise the email founds its own. Lookup failures log
    /// and fall back rather than failing the import.
    async fn resolve_thread(
        &self,
        account: &str,
        email_id: &str,
        in_reply_to: &[String],
    ) -> (String, ChangeType) {
        let Some(parent_mid) = in_reply_to.first() else {
            return (email_id.to_string(), ChangeType::Created);
        };
        match self.repo.find_by_message_id(account, parent_mid).await {
            Ok(Some(parent)) => (parent.thread_id, ChangeType::Updated),
            Ok(None) => (email_id.to_string(), ChangeType::Created),
            Err(error) => {
                tracing::warn!(account, %error, "thread lookup failed, starting a new thread");
                (email_id.to_string(), ChangeType::Created)
            }
        }
    }

    /// One atomic bundle: email + membership rows, Email/Thread state
    /// advancement, one counter bump per mailbox, and a multi-object
    /// Mailbox state advancement. Rebuilt from fresh state reads when a
    /// precondition loses a race.
    async fn commit(&self, email: &EmailRecord, thread_change: ChangeType) -> Result<(), StoreError> {
        let account = email.account_id.as_str();
        let mailbox_ids: Vec<String> = email.mailbox_ids.iter().cloned().collect();

        let mut attempt = 0;
        loop {
            let email_state = self.tracker.current_state(account, ObjectType::Email).await?;
            let thread_state = self.tracker.current_state(account, ObjectType::Thread).await?;
            let mailbox_state = self
                .tracker
                .current_state(account, ObjectType::Mailbox)
                .await?;

            let mut items = self.repo.build_create_email_items(email);
            let (_, email_items) = self.tracker.build_state_change_items(
                account,
                ObjectType::Email,
                email_state,
                &email.email_id,
                ChangeType::Created,
            );
            items.extend(email_items);
            let (_, thread_items) = self.tracker.build_state_change_items(
                account,
                ObjectType::Thread,
                thread_state,
                &email.thread_id,
                thread_change,
            );
            items.extend(thread_items);
            for mailbox_id in &mailbox_ids {
                items.push(self.repo.build_increment_counts_item(
                    account,
                    mailbox_id,
                    !email.is_seen(),
                ));
            }
            let (_, mailbox_items) = self.tracker.build_state_change_items_multi(
                account,
                ObjectType::Mailbox,
                mailbox_state,
                &mailbox_ids,
                ChangeType::Updated,
            );
            items.extend(mailbox_items);

            match self.repo.store().transact_write(items).await {
                Ok(()) => return Ok(()),
                Err(StoreError::ConditionFailed) if attempt + 1 < STATE_RETRY_LIMIT => {
                    attempt += 1;
                    tracing::debug!(account, attempt, "state race lost, rebuilding import transaction");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort cleanup of decoded-part blobs that will never be
    /// referenced. The original raw blob is never touched.
    async fn compensate(&self, account: &str, blob_ids: &[String]) {
        if blob_ids.is_empty() {
            return;
        }
        let message = BlobDeleteMessage {
            account_id: account.to_string(),
            blob_ids: blob_ids.to_vec(),
            api_url: self.api_url.clone(),
        };
        if let Err(error) = self.queue.publish(&message).await {
            tracing::error!(account, %error, "compensating blob cleanup publish failed");
        }
    }
}

/// JMAP id-set shape: an object of `id -> true`. An array of strings is
/// tolerated.
fn id_set(args: &Args, key: &str) -> BTreeSet<String> {
    if let Some(map) = args.object(key) {
        return map
            .iter()
            .filter(|(_, set)| set.as_bool() == Some(true))
            .map(|(id, _)| id.clone())
            .collect();
    }
    args.string_slice(key).unwrap_or_default().into_iter().collect()
}
