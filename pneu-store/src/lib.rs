pub mod email;
pub mod ident;
pub mod memory;
pub mod repo;
pub mod state;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use email::EmailRecord;
pub use ident::{gen_email_id, EmailId};
pub use repo::EmailRepo;
pub use state::{ChangeType, ObjectType, StateTracker};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("transaction precondition failed")]
    ConditionFailed,
    #[error("storage failure: {0}")]
    Internal(String),
}

/// Primary key of one record: the account is the partition, everything
/// else lives in the typed sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// The record must not exist yet.
    Absent,
    /// The named integer field must equal the expected value; a record
    /// that does not exist counts as the field being 0.
    FieldEquals(&'static str, i64),
}

/// One entry of an atomic write bundle.
#[derive(Debug, Clone)]
pub enum WriteItem {
    Put {
        key: ItemKey,
        value: Value,
        precondition: Precondition,
    },
    Delete {
        key: ItemKey,
    },
    /// Numeric adds over integer fields, creating the record when
    /// absent.
    Add {
        key: ItemKey,
        fields: Vec<(&'static str, i64)>,
    },
}

/// Contract over the record store. The engine only needs point reads,
/// sort-prefix queries within one partition, field merges, and a
/// conditional multi-record atomic write; which engine provides that is
/// a deployment concern.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &ItemKey) -> Result<Option<Value>, StoreError>;

    async fn query_prefix(
        &self,
        partition: &str,
        sort_prefix: &str,
    ) -> Result<Vec<(ItemKey, Value)>, StoreError>;

    /// Apply every item or none. Any violated precondition fails the
    /// whole bundle with [`StoreError::ConditionFailed`].
    async fn transact_write(&self, items: Vec<WriteItem>) -> Result<(), StoreError>;

    /// Merge fields into an existing record.
    async fn update_fields(
        &self,
        key: &ItemKey,
        fields: Vec<(&'static str, Value)>,
    ) -> Result<(), StoreError>;
}

pub type DynStore = Arc<dyn Store>;
