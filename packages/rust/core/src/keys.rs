//! Selection of records missing the target attribute and their owner keys.

use std::collections::BTreeSet;

use backfill_shared::{Document, FieldsConfig};
use tracing::info;

/// Owner keys referenced by qualifying records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyCollection {
    /// Distinct owner keys. Ordered only so chunking is reproducible.
    pub keys: BTreeSet<String>,
    /// Number of records that qualified (before deduplication).
    pub qualifying: usize,
}

/// A record qualifies when its target is absent, null, or empty and its
/// owner key is a non-empty string.
pub fn qualifies(record: &Document, fields: &FieldsConfig) -> bool {
    record.is_blank(&fields.target) && record.non_empty_str(&fields.owner_key).is_some()
}

/// Collect the owner keys of every qualifying record.
pub fn collect_keys(records: &[Document], fields: &FieldsConfig) -> KeyCollection {
    let mut collection = KeyCollection::default();

    for record in records.iter().filter(|r| qualifies(r, fields)) {
        if let Some(owner) = record.non_empty_str(&fields.owner_key) {
            collection.keys.insert(owner.to_string());
            collection.qualifying += 1;
        }
    }

    info!(
        qualifying = collection.qualifying,
        distinct_keys = collection.keys.len(),
        target = %fields.target,
        "found records without target attribute"
    );

    collection
}
