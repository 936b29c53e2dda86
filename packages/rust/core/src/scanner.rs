//! Full read of the source collection.

use backfill_shared::{Document, Result};
use backfill_storage::DocumentStore;
use tracing::{debug, instrument};

/// Read every record in `collection` into memory.
///
/// The filter on the target attribute happens client-side in
/// [`crate::keys`]; store read errors propagate unchanged.
#[instrument(skip(store))]
pub async fn scan(store: &dyn DocumentStore, collection: &str) -> Result<Vec<Document>> {
    let records = store.scan(collection).await?;
    debug!(count = records.len(), "source collection scanned");
    Ok(records)
}
