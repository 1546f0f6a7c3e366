use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{DynStore, ItemKey, Precondition, StoreError, WriteItem};

pub const DEFAULT_STATE_TTL_DAYS: i64 = 7;

/// Object types with a per-account change sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Email,
    Thread,
    Mailbox,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Email => "Email",
            ObjectType::Thread => "Thread",
            ObjectType::Mailbox => "Mailbox",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Destroyed,
}

/// Changes observed between two states of one object type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateChanges {
    pub new_state: i64,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub destroyed: Vec<String>,
}

fn counter_key(account: &str, object_type: ObjectType) -> ItemKey {
    ItemKey::new(account, format!("state/{}", object_type.as_str()))
}

fn log_key(account: &str, object_type: ObjectType, state: i64) -> ItemKey {
    // Zero-padded so the sort order is the numeric order.
    ItemKey::new(
        account,
        format!("statelog/{}/{:020}", object_type.as_str(), state),
    )
}

/// Per-(account, object-type) monotonic sequence plus a TTL-bounded
/// change log. The tracker builds conditional write items; the enclosing
/// transaction serializes concurrent writers through the counter's
/// precondition, and the caller owns the re-read-and-retry loop.
#[derive(Clone)]
pub struct StateTracker {
    store: DynStore,
    ttl: Duration,
}

impl StateTracker {
    pub fn new(store: DynStore, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub async fn current_state(
        &self,
        account: &str,
        object_type: ObjectType,
    ) -> Result<i64, StoreError> {
        let row = self.store.get(&counter_key(account, object_type)).await?;
        Ok(row
            .and_then(|v| v.get("current").and_then(serde_json::Value::as_i64))
            .unwrap_or(0))
    }

    /// Items advancing the counter by one and logging the change for
    /// `object_id`. Returns the state the objects will land at.
    pub fn build_state_change_items(
        &self,
        account: &str,
        object_type: ObjectType,
        current_state: i64,
        object_id: &str,
        change: ChangeType,
    ) -> (i64, Vec<WriteItem>) {
        self.build_state_change_items_multi(
            account,
            object_type,
            current_state,
            &[object_id.to_string()],
            change,
        )
    }

    /// Single counter bump of `object_ids.len()`, one change-log row per
    /// object at states `current+1 ..= current+N`.
    pub fn build_state_change_items_multi(
        &self,
        account: &str,
        object_type: ObjectType,
        current_state: i64,
        object_ids: &[String],
        change: ChangeType,
    ) -> (i64, Vec<WriteItem>) {
        let new_state = current_state + object_ids.len() as i64;
        let expires_at = (Utc::now() + self.ttl).timestamp();

        let mut items = Vec::with_capacity(object_ids.len() + 1);
        items.push(WriteItem::Put {
            key: counter_key(account, object_type),
            value: json!({ "current": new_state }),
            precondition: Precondition::FieldEquals("current", current_state),
        });
        for (i, object_id) in object_ids.iter().enumerate() {
            let state = current_state + 1 + i as i64;
            items.push(WriteItem::Put {
                key: log_key(account, object_type, state),
                value: json!({
                    "objectId": object_id,
                    "changeType": change,
                    "expiresAt": expires_at,
                }),
                precondition: Precondition::None,
            });
        }
        (new_state, items)
    }

    /// Replay the change log after `since_state`, newest state wins per
    /// object id.
    pub async fn changes_since(
        &self,
        account: &str,
        object_type: ObjectType,
        since_state: i64,
    ) -> Result<StateChanges, StoreError> {
        let prefix = format!("statelog/{}/", object_type.as_str());
        let rows = self.store.query_prefix(account, &prefix).await?;

        let mut changes = StateChanges {
            new_state: self.current_state(account, object_type).await?,
            ..StateChanges::default()
        };
        for (key, value) in rows {
            let state: i64 = key
                .sort
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            if state <= since_state {
                continue;
            }
            let Some(object_id) = value.get("objectId").and_then(|v| v.as_str()) else {
                continue;
            };
            let change: ChangeType = match value
                .get("changeType")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
            {
                Some(c) => c,
                None => continue,
            };
            let list = match change {
                ChangeType::Created => &mut changes.created,
                ChangeType::Updated => &mut changes.updated,
                ChangeType::Destroyed => &mut changes.destroyed,
            };
            if !list.contains(&object_id.to_string()) {
                list.push(object_id.to_string());
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStore;
    use std::sync::Arc;

    fn tracker() -> StateTracker {
        StateTracker::new(Arc::new(MemStore::new()), DEFAULT_STATE_TTL_DAYS)
    }

    #[tokio::test]
    async fn counter_advances_monotonically() {
        let t = tracker();
        let s0 = t.current_state("alice", ObjectType::Email).await.unwrap();
        assert_eq!(s0, 0);

        let (s1, items) =
            t.build_state_change_items("alice", ObjectType::Email, s0, "e1", ChangeType::Created);
        assert_eq!(s1, 1);
        assert_eq!(items.len(), 2);
        t.store().transact_write(items).await.unwrap();
        assert_eq!(t.current_state("alice", ObjectType::Email).await.unwrap(), 1);

        // A stale current_state loses the race.
        let (_, stale) =
            t.build_state_change_items("alice", ObjectType::Email, s0, "e2", ChangeType::Created);
        let err = t.store().transact_write(stale).await;
        assert!(matches!(err, Err(StoreError::ConditionFailed)));
        assert_eq!(t.current_state("alice", ObjectType::Email).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn multi_bump_logs_each_object() {
        let t = tracker();
        let ids = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];
        let (new_state, items) = t.build_state_change_items_multi(
            "alice",
            ObjectType::Mailbox,
            0,
            &ids,
            ChangeType::Updated,
        );
        assert_eq!(new_state, 3);
        assert_eq!(items.len(), 4);
        t.store().transact_write(items).await.unwrap();

        let changes = t
            .changes_since("alice", ObjectType::Mailbox, 0)
            .await
            .unwrap();
        assert_eq!(changes.new_state, 3);
        assert_eq!(changes.updated, ids);
        assert!(changes.created.is_empty());
    }

    #[tokio::test]
    async fn changes_since_filters_by_state() {
        let t = tracker();
        for (i, (id, change)) in [
            ("e1", ChangeType::Created),
            ("e2", ChangeType::Created),
            ("e1", ChangeType::Destroyed),
        ]
        .into_iter()
        .enumerate()
        {
            let (_, items) = t.build_state_change_items(
                "alice",
                ObjectType::Email,
                i as i64,
                id,
                change,
            );
            t.store().transact_write(items).await.unwrap();
        }

        let changes = t.changes_since("alice", ObjectType::Email, 2).await.unwrap();
        assert_eq!(changes.new_state, 3);
        assert!(changes.created.is_empty());
        assert_eq!(changes.destroyed, vec!["e1"]);

        let all = t.changes_since("alice", ObjectType::Email, 0).await.unwrap();
        assert_eq!(all.created, vec!["e1", "e2"]);
        assert_eq!(all.destroyed, vec!["e1"]);
    }

    #[tokio::test]
    async fn types_are_independent() {
        let t = tracker();
        let (_, items) =
            t.build_state_change_items("alice", ObjectType::Email, 0, "e1", ChangeType::Created);
        t.store().transact_write(items).await.unwrap();
        assert_eq!(t.current_state("alice", ObjectType::Thread).await.unwrap(), 0);
        assert_eq!(t.current_state("bob", ObjectType::Email).await.unwrap(), 0);
    }
}
