use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ItemKey, Precondition, Store, StoreError, WriteItem};

/// In-memory twin of the record store, honoring the same atomic-write
/// contract (all preconditions checked under one lock, then every item
/// applied or none). Backs the test suites and the local tooling.
#[derive(Debug, Default)]
pub struct MemStore {
    rows: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct snapshot accessor for test assertions.
    pub fn dump(&self) -> Vec<(ItemKey, Value)> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|((p, s), v)| (ItemKey::new(p.clone(), s.clone()), v.clone()))
            .collect()
    }

    fn check(
        rows: &BTreeMap<(String, String), Value>,
        key: &ItemKey,
        precondition: &Precondition,
    ) -> Result<(), StoreError> {
        let existing = rows.get(&(key.partition.clone(), key.sort.clone()));
        match precondition {
            Precondition::None => Ok(()),
            Precondition::Absent => match existing {
                None => Ok(()),
                Some(_) => Err(StoreError::ConditionFailed),
            },
            Precondition::FieldEquals(field, expected) => {
                let actual = existing
                    .and_then(|v| v.get(*field))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if actual == *expected {
                    Ok(())
                } else {
                    Err(StoreError::ConditionFailed)
                }
            }
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Internal("store lock poisoned".into())
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Value>, StoreError> {
        tracing::trace!(partition = %key.partition, sort = %key.sort, command = "get");
        let rows = self.rows.lock().or(Err(poisoned()))?;
        Ok(rows.get(&(key.partition.clone(), key.sort.clone())).cloned())
    }

    async fn query_prefix(
        &self,
        partition: &str,
        sort_prefix: &str,
    ) -> Result<Vec<(ItemKey, Value)>, StoreError> {
        tracing::trace!(partition, sort_prefix, command = "query_prefix");
        let rows = self.rows.lock().or(Err(poisoned()))?;
        Ok(rows
            .range((partition.to_string(), sort_prefix.to_string())..)
            .take_while(|((p, s), _)| p == partition && s.starts_with(sort_prefix))
            .map(|((p, s), v)| (ItemKey::new(p.clone(), s.clone()), v.clone()))
            .collect())
    }

    async fn transact_write(&self, items: Vec<WriteItem>) -> Result<(), StoreError> {
        tracing::trace!(items = items.len(), command = "transact_write");
        let mut rows = self.rows.lock().or(Err(poisoned()))?;

        for item in &items {
            match item {
                WriteItem::Put {
                    key, precondition, ..
                } => Self::check(&rows, key, precondition)?,
                WriteItem::Delete { .. } | WriteItem::Add { .. } => (),
            }
        }

        for item in items {
            match item {
                WriteItem::Put { key, value, .. } => {
                    rows.insert((key.partition, key.sort), value);
                }
                WriteItem::Delete { key } => {
                    rows.remove(&(key.partition, key.sort));
                }
                WriteItem::Add { key, fields } => {
                    let entry = rows
                        .entry((key.partition, key.sort))
                        .or_insert_with(|| Value::Object(Default::default()));
                    if let Value::Object(map) = entry {
                        for (field, delta) in fields {
                            let current = map.get(field).and_then(Value::as_i64).unwrap_or(0);
                            map.insert(field.to_string(), Value::from(current + delta));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn update_fields(
        &self,
        key: &ItemKey,
        fields: Vec<(&'static str, Value)>,
    ) -> Result<(), StoreError> {
        tracing::trace!(partition = %key.partition, sort = %key.sort, command = "update_fields");
        let mut rows = self.rows.lock().or(Err(poisoned()))?;
        let entry = rows
            .get_mut(&(key.partition.clone(), key.sort.clone()))
            .ok_or(StoreError::NotFound)?;
        let Value::Object(map) = entry else {
            return Err(StoreError::Internal("record is not an object".into()));
        };
        for (field, value) in fields {
            match value {
                Value::Null => {
                    map.remove(field);
                }
                other => {
                    map.insert(field.to_string(), other);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(sort: &str) -> ItemKey {
        ItemKey::new("alice", sort)
    }

    #[tokio::test]
    async fn precondition_failure_applies_nothing() {
        let store = MemStore::new();
        store
            .transact_write(vec![WriteItem::Put {
                key: key("a"),
                value: json!({"v": 1}),
                precondition: Precondition::None,
            }])
            .await
            .unwrap();

        let result = store
            .transact_write(vec![
                WriteItem::Put {
                    key: key("b"),
                    value: json!({"v": 2}),
                    precondition: Precondition::None,
                },
                WriteItem::Put {
                    key: key("a"),
                    value: json!({"v": 3}),
                    precondition: Precondition::Absent,
                },
            ])
            .await;
        assert!(matches!(result, Err(StoreError::ConditionFailed)));
        assert!(store.get(&key("b")).await.unwrap().is_none());
        assert_eq!(store.get(&key("a")).await.unwrap().unwrap()["v"], 1);
    }

    #[tokio::test]
    async fn field_equals_treats_missing_as_zero() {
        let store = MemStore::new();
        store
            .transact_write(vec![WriteItem::Put {
                key: key("state/email"),
                value: json!({"current": 1}),
                precondition: Precondition::FieldEquals("current", 0),
            }])
            .await
            .unwrap();

        let stale = store
            .transact_write(vec![WriteItem::Put {
                key: key("state/email"),
                value: json!({"current": 2}),
                precondition: Precondition::FieldEquals("current", 0),
            }])
            .await;
        assert!(matches!(stale, Err(StoreError::ConditionFailed)));
    }

    #[tokio::test]
    async fn add_creates_and_increments() {
        let store = MemStore::new();
        let counters = key("mbx/inbox");
        store
            .transact_write(vec![WriteItem::Add {
                key: counters.clone(),
                fields: vec![("totalEmails", 1), ("unreadEmails", 1)],
            }])
            .await
            .unwrap();
        store
            .transact_write(vec![WriteItem::Add {
                key: counters.clone(),
                fields: vec![("totalEmails", 1)],
            }])
            .await
            .unwrap();
        let row = store.get(&counters).await.unwrap().unwrap();
        assert_eq!(row["totalEmails"], 2);
        assert_eq!(row["unreadEmails"], 1);
    }

    #[tokio::test]
    async fn prefix_query_stays_in_partition() {
        let store = MemStore::new();
        for (account, sort) in [("alice", "email/1"), ("alice", "email/2"), ("bob", "email/3")] {
            store
                .transact_write(vec![WriteItem::Put {
                    key: ItemKey::new(account, sort),
                    value: json!({}),
                    precondition: Precondition::None,
                }])
                .await
                .unwrap();
        }
        let rows = store.query_prefix("alice", "email/").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|(k, _)| k.partition == "alice"));
    }

    #[tokio::test]
    async fn update_fields_merges_and_removes() {
        let store = MemStore::new();
        store
            .transact_write(vec![WriteItem::Put {
                key: key("email/1"),
                value: json!({"keep": true}),
                precondition: Precondition::None,
            }])
            .await
            .unwrap();
        store
            .update_fields(
                &key("email/1"),
                vec![("summary", json!("short")), ("keep", Value::Null)],
            )
            .await
            .unwrap();
        let row = store.get(&key("email/1")).await.unwrap().unwrap();
        assert_eq!(row["summary"], "short");
        assert!(row.get("keep").is_none());

        let missing = store
            .update_fields(&key("email/404"), vec![("summary", json!("x"))])
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }
}
