use serde_json::Value;

use pneu_store::{ChangeType, EmailRepo, ObjectType, StateTracker, StoreError};

use crate::queue::{BlobDeleteMessage, DynDeleteQueue};
use crate::BatchOutcome;

const STATE_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    Insert,
    Modify,
    Remove,
}

/// One record-modification event from the store's change stream, with
/// the record images as raw JSON.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    pub id: String,
    pub kind: StreamEventKind,
    pub old_image: Option<Value>,
    pub new_image: Option<Value>,
}

/// Watches the change stream for the soft-delete transition (`deletedAt`
/// absent in the OLD image, present in the NEW one), hard-deletes the
/// record with its projections, and queues the orphaned blob ids.
pub struct SoftDeleteObserver {
    repo: EmailRepo,
    tracker: StateTracker,
    queue: DynDeleteQueue,
    api_url: String,
}

impl SoftDeleteObserver {
    pub fn new(
        repo: EmailRepo,
        tracker: StateTracker,
        queue: DynDeleteQueue,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            tracker,
            queue,
            api_url: api_url.into(),
        }
    }

    /// The `(account, emailId)` of a fresh soft-delete, or None for
    /// anything else: inserts, removals, unrelated modifications, and
    /// rewrites of an already-set `deletedAt`.
    pub fn soft_delete_transition(event: &RecordEvent) -> Option<(String, String)> {
        if event.kind != StreamEventKind::Modify {
            return None;
        }
        let old = event.old_image.as_ref()?;
        let new = event.new_image.as_ref()?;
        if old.get("deletedAt").is_some() || new.get("deletedAt").is_none() {
            return None;
        }
        let account = new.get("accountId")?.as_str()?.to_string();
        let email_id = new.get("emailId")?.as_str()?.to_string();
        Some((account, email_id))
    }

    /// Process one stream batch. A failed hard-delete fails that event
    /// (the stream redelivers it); a failed queue publish does not,
    /// since the deletion already committed.
    pub async fn handle_batch(&self, events: &[RecordEvent]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for event in events {
            let Some((account, email_id)) = Self::soft_delete_transition(event) else {
                continue;
            };
            if let Err(error) = self.hard_delete(&account, &email_id).await {
                tracing::error!(account, email_id, %error, "hard delete failed");
                outcome.failed_ids.push(event.id.clone());
            }
        }
        outcome
    }

    async fn hard_delete(&self, account: &str, email_id: &str) -> Result<(), StoreError> {
        let Some(email) = self.repo.get_email(account, email_id).await? else {
            // Already hard-deleted by an earlier delivery.
            return Ok(());
        };

        let mut attempt = 0;
        loop {
            let email_state = self.tracker.current_state(account, ObjectType::Email).await?;
            let mut items = self.repo.build_delete_email_items(&email);
            let (_, state_items) = self.tracker.build_state_change_items(
                account,
                ObjectType::Email,
                email_state,
                email_id,
                ChangeType::Destroyed,
            );
            items.extend(state_items);

            match self.repo.store().transact_write(items).await {
                Ok(()) => break,
                Err(StoreError::ConditionFailed) if attempt + 1 < STATE_RETRY_LIMIT => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(account, email_id, "hard-deleted email");

        // Best-effort: the record is gone either way, a lost message only
        // means the blobs leak until noticed.
        let message = BlobDeleteMessage {
            account_id: account.to_string(),
            blob_ids: email.owned_blob_ids(),
            api_url: self.api_url.clone(),
        };
        if let Err(error) = self.queue.publish(&message).await {
            tracing::error!(account, email_id, %error, "blob cleanup publish failed");
        }
        Ok(())
    }
}
