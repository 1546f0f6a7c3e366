pub mod consumer;
pub mod queue;
pub mod stream;

pub use consumer::{BlobDeleteConsumer, QueueRecord};
pub use queue::{BlobDeleteMessage, DeleteQueue, DynDeleteQueue, MemQueue, QueueError};
pub use stream::{RecordEvent, SoftDeleteObserver, StreamEventKind};

/// Outcome of one batch: ids of the records that must be redelivered.
/// An empty list acknowledges the whole batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub failed_ids: Vec<String>,
}

impl BatchOutcome {
    pub fn all_ok(&self) -> bool {
        self.failed_ids.is_empty()
    }
}
