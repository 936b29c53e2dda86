//! The document store seam consumed by the backfill pipeline.

use async_trait::async_trait;
use backfill_shared::{BackfillError, Document, Result, WriteBatch};

/// Maximum number of values a single set-membership query may test against.
///
/// This is the reference store's fan-out limit for `IN` queries, not a
/// tuning knob. Callers must chunk larger key sets.
pub const MAX_IN_VALUES: usize = 30;

/// Operations the pipeline needs from a document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read every document in `collection`. No pagination.
    async fn scan(&self, collection: &str) -> Result<Vec<Document>>;

    /// Read documents in `collection` whose `field` equals one of `values`.
    ///
    /// Fails with [`BackfillError::Validation`] if more than
    /// [`MAX_IN_VALUES`] values are given.
    async fn find_in(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Document>>;

    /// Apply every update in `batch` atomically. Returns the number of
    /// documents updated; on error nothing is applied.
    async fn commit(&self, batch: WriteBatch) -> Result<usize>;
}

/// Reject `IN` lists over the fan-out limit.
pub fn check_in_values(values: &[String]) -> Result<()> {
    if values.len() > MAX_IN_VALUES {
        return Err(BackfillError::validation(format!(
            "{} values exceeds the IN limit of {MAX_IN_VALUES}",
            values.len()
        )));
    }
    Ok(())
}
