use crate::DomainResult;
use crate::location::{LocationRecord, RawRecord};

use super::BoxFuture;

/// Append-only record log. Records are immutable once appended and are
/// read back as a full scan in arrival order.
pub trait LocationStore: Send + Sync {
    /// Appends exactly one record; all-or-nothing per record.
    fn append(&self, record: &LocationRecord) -> BoxFuture<'_, DomainResult<()>>;

    /// Full scan in arrival order. A missing or unreadable store reads
    /// as an empty sequence, never an error.
    fn read_all(&self) -> BoxFuture<'_, DomainResult<Vec<RawRecord>>>;
}
