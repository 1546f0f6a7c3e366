use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::email::EmailRecord;
use crate::{DynStore, ItemKey, Precondition, StoreError, WriteItem};

pub fn email_key(account: &str, email_id: &str) -> ItemKey {
    ItemKey::new(account, format!("email/{}", email_id))
}

/// Membership projection `(account, mailboxId, emailId)`, the index a
/// mailbox listing walks.
pub fn membership_key(account: &str, mailbox_id: &str, email_id: &str) -> ItemKey {
    ItemKey::new(account, format!("mbxmail/{}/{}", mailbox_id, email_id))
}

pub fn mailbox_key(account: &str, mailbox_id: &str) -> ItemKey {
    ItemKey::new(account, format!("mbx/{}", mailbox_id))
}

/// Email records and their projections over the record store.
#[derive(Clone)]
pub struct EmailRepo {
    store: DynStore,
}

impl EmailRepo {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Fetch a record as stored; soft-deleted records come back with
    /// `deletedAt` set and the caller decides visibility.
    pub async fn get_email(
        &self,
        account: &str,
        email_id: &str,
    ) -> Result<Option<EmailRecord>, StoreError> {
        let row = self.store.get(&email_key(account, email_id)).await?;
        row.map(decode_record).transpose()
    }

    /// Resolve a bare message id within one account. Ties go to the
    /// lexicographically lowest email id so the answer is deterministic.
    pub async fn find_by_message_id(
        &self,
        account: &str,
        bare_message_id: &str,
    ) -> Result<Option<EmailRecord>, StoreError> {
        let rows = self.store.query_prefix(account, "email/").await?;
        for (_, value) in rows {
            let record = decode_record(value)?;
            if record.message_id.iter().any(|mid| mid == bare_message_id) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Write items for one atomic create: the email record (guarded
    /// against id collisions) plus one membership row per mailbox.
    pub fn build_create_email_items(&self, email: &EmailRecord) -> Vec<WriteItem> {
        let mut items = Vec::with_capacity(1 + email.mailbox_ids.len());
        items.push(WriteItem::Put {
            key: email_key(&email.account_id, &email.email_id),
            value: serde_json::to_value(email).expect("email record serializes"),
            precondition: Precondition::Absent,
        });
        for mailbox_id in &email.mailbox_ids {
            items.push(WriteItem::Put {
                key: membership_key(&email.account_id, mailbox_id, &email.email_id),
                value: json!({
                    "accountId": email.account_id,
                    "mailboxId": mailbox_id,
                    "emailId": email.email_id,
                }),
                precondition: Precondition::None,
            });
        }
        items
    }

    /// The matching delete items for hard-deletion.
    pub fn build_delete_email_items(&self, email: &EmailRecord) -> Vec<WriteItem> {
        let mut items = Vec::with_capacity(1 + email.mailbox_ids.len());
        items.push(WriteItem::Delete {
            key: email_key(&email.account_id, &email.email_id),
        });
        for mailbox_id in &email.mailbox_ids {
            items.push(WriteItem::Delete {
                key: membership_key(&email.account_id, mailbox_id, &email.email_id),
            });
        }
        items
    }

    pub async fn mailbox_exists(
        &self,
        account: &str,
        mailbox_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(&mailbox_key(account, mailbox_id))
            .await?
            .is_some())
    }

    /// Counter bump item for one import into `mailbox_id`.
    pub fn build_increment_counts_item(
        &self,
        account: &str,
        mailbox_id: &str,
        increment_unread: bool,
    ) -> WriteItem {
        let mut fields = vec![("totalEmails", 1)];
        if increment_unread {
            fields.push(("unreadEmails", 1));
        }
        WriteItem::Add {
            key: mailbox_key(account, mailbox_id),
            fields,
        }
    }

    /// Asynchronous indexing write-back; fire-and-forget semantics at
    /// the call sites.
    pub async fn update_search_chunks(
        &self,
        account: &str,
        email_id: &str,
        chunks: i64,
    ) -> Result<(), StoreError> {
        self.store
            .update_fields(
                &email_key(account, email_id),
                vec![("searchChunks", json!(chunks))],
            )
            .await
    }

    pub async fn update_summary(
        &self,
        account: &str,
        email_id: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        self.store
            .update_fields(
                &email_key(account, email_id),
                vec![("summary", json!(summary))],
            )
            .await
    }

    /// Soft-delete: stamp `deletedAt`. The hard-delete pipeline reacts
    /// to the resulting change-stream transition.
    pub async fn mark_deleted(
        &self,
        account: &str,
        email_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.store
            .update_fields(
                &email_key(account, email_id),
                vec![("deletedAt", json!(when))],
            )
            .await
    }

    /// Seed a mailbox record; mailbox lifecycle is otherwise out of this
    /// engine's hands.
    pub async fn create_mailbox(&self, account: &str, mailbox_id: &str) -> Result<(), StoreError> {
        self.store
            .transact_write(vec![WriteItem::Put {
                key: mailbox_key(account, mailbox_id),
                value: json!({ "totalEmails": 0, "unreadEmails": 0 }),
                precondition: Precondition::None,
            }])
            .await
    }

    pub async fn mailbox_counts(
        &self,
        account: &str,
        mailbox_id: &str,
    ) -> Result<(i64, i64), StoreError> {
        let row = self
            .store
            .get(&mailbox_key(account, mailbox_id))
            .await?
            .ok_or(StoreError::NotFound)?;
        let total = row.get("totalEmails").and_then(Value::as_i64).unwrap_or(0);
        let unread = row.get("unreadEmails").and_then(Value::as_i64).unwrap_or(0);
        Ok((total, unread))
    }
}

fn decode_record(value: Value) -> Result<EmailRecord, StoreError> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Internal(format!("undecodable email record: {}", e)))
}
