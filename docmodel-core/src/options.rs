//! Configuration for databases and transactions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time limit applied to one-shot [`Database`](crate::store::Database) operations.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Batch size used by `list` and `list_descending`.
pub const DEFAULT_LIST_BATCH_SIZE: u64 = 100;
/// Page size used by `next` when the requested size is below 1.
pub const DEFAULT_NEXT_PAGE_SIZE: u64 = 10;

/// Settings shared by every transaction opened on a database.
///
/// # Example
///
/// ```ignore
/// let options = DatabaseOptions::default()
///     .with_operation_timeout(Duration::from_secs(5))
///     .with_list_batch_size(500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    /// Time limit for one-shot operations. Listing is not bounded by it.
    pub operation_timeout: Duration,
    /// Batch size used by `list` and `list_descending`.
    pub list_batch_size: u64,
    /// Page size used by `next` when the requested size is below 1.
    pub next_page_size: u64,
}

impl DatabaseOptions {
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_list_batch_size(mut self, batch_size: u64) -> Self {
        self.list_batch_size = batch_size.max(1);
        self
    }

    pub fn with_next_page_size(mut self, page_size: u64) -> Self {
        self.next_page_size = page_size.max(1);
        self
    }
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            list_batch_size: DEFAULT_LIST_BATCH_SIZE,
            next_page_size: DEFAULT_NEXT_PAGE_SIZE,
        }
    }
}

/// Options of a single transaction.
///
/// `multi_doc` opens a store session with a multi-document transaction. Without it, the
/// callback runs directly against the store and writes are never rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnOptions {
    pub multi_doc: bool,
}

impl TxnOptions {
    pub fn multi_doc() -> Self {
        Self { multi_doc: true }
    }

    pub fn plain() -> Self {
        Self { multi_doc: false }
    }
}

impl From<bool> for TxnOptions {
    fn from(multi_doc: bool) -> Self {
        Self { multi_doc }
    }
}
