//! Turning resolved owner keys into one atomic bulk write.

use backfill_shared::{Document, FieldsConfig, Result, WriteBatch};
use backfill_storage::DocumentStore;
use tracing::{debug, info};

use crate::keys::qualifies;
use crate::pipeline::ProgressReporter;
use crate::resolver::ResolutionMap;

/// An update the pipeline intends to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    /// Storage id of the record.
    pub doc_id: String,
    /// Human-facing record label for log lines.
    pub label: String,
    pub owner_key: String,
    pub value: String,
}

/// Plan one update per qualifying record whose owner key resolved.
///
/// Records that already carry the target attribute are never planned,
/// whatever the map contains. Unresolved records are skipped silently.
pub fn plan_updates(
    records: &[Document],
    resolved: &ResolutionMap,
    fields: &FieldsConfig,
) -> Vec<PlannedUpdate> {
    records
        .iter()
        .filter(|r| qualifies(r, fields))
        .filter_map(|record| {
            let owner = record.non_empty_str(&fields.owner_key)?;
            let value = resolved.get(owner)?;
            Some(PlannedUpdate {
                doc_id: record.id.clone(),
                label: record_label(record, fields),
                owner_key: owner.to_string(),
                value: value.clone(),
            })
        })
        .collect()
}

/// Queue every planned update into a [`WriteBatch`], logging each one.
pub fn build_batch(
    collection: &str,
    plan: &[PlannedUpdate],
    fields: &FieldsConfig,
    progress: &dyn ProgressReporter,
) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for update in plan {
        batch.update(collection, &update.doc_id, &fields.target, &update.value);
        info!(
            record = %update.label,
            owner_key = %update.owner_key,
            value = %update.value,
            "{} : {} : {}",
            update.label,
            update.owner_key,
            update.value
        );
        progress.update_queued(&update.label, &update.owner_key, &update.value);
    }
    batch
}

/// Commit `batch` in one atomic write. An empty batch is not sent.
pub async fn commit(store: &dyn DocumentStore, batch: WriteBatch) -> Result<usize> {
    if batch.is_empty() {
        debug!("nothing to update, skipping commit");
        return Ok(0);
    }
    let queued = batch.len();
    let applied = store.commit(batch).await?;
    debug!(queued, applied, "bulk write committed");
    Ok(applied)
}

/// Label a record by its label field when it holds a string or number,
/// otherwise by its storage id.
fn record_label(record: &Document, fields: &FieldsConfig) -> String {
    match record.field(&fields.label) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => record.id.clone(),
    }
}
