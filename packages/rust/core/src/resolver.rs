//! Owner-key resolution against the reference collection.
//!
//! Keys are looked up in chunks of at most [`MAX_IN_VALUES`] because the
//! store caps the fan-out of set-membership queries. Chunks run in order and
//! every chunk is merged before the map is returned.

use std::collections::{BTreeSet, HashMap};

use backfill_shared::{Document, FieldsConfig, Result};
use backfill_storage::{DocumentStore, MAX_IN_VALUES};
use tracing::{debug, info, instrument};

/// Owner key → resolved value.
pub type ResolutionMap = HashMap<String, String>;

/// A reference document viewed through the field mapping.
///
/// `storage_id` is the store's identifier; `name` is the natural key that
/// owner keys point at. They are independent and never compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntity {
    pub storage_id: String,
    pub name: String,
    pub resolved_value: Option<String>,
}

impl ReferenceEntity {
    /// Returns `None` when the document has no natural key.
    pub fn from_document(doc: &Document, fields: &FieldsConfig) -> Option<Self> {
        let name = doc.non_empty_str(&fields.reference_key)?;
        Some(Self {
            storage_id: doc.id.clone(),
            name: name.to_string(),
            resolved_value: doc.non_empty_str(&fields.reference_value).map(String::from),
        })
    }
}

/// Split `keys` into chunks of at most `size` (minimum 1).
pub fn chunk_keys(keys: &BTreeSet<String>, size: usize) -> Vec<Vec<String>> {
    let keys: Vec<String> = keys.iter().cloned().collect();
    keys.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}

/// Resolve every key in `keys` against `collection`.
///
/// Entities without a value are skipped; keys with no match are simply
/// absent from the result. The first failing chunk aborts the whole
/// resolution.
#[instrument(skip_all, fields(collection = %collection, keys = keys.len()))]
pub async fn resolve(
    store: &dyn DocumentStore,
    collection: &str,
    keys: &BTreeSet<String>,
    fields: &FieldsConfig,
) -> Result<ResolutionMap> {
    let chunks = chunk_keys(keys, MAX_IN_VALUES);
    let mut map = ResolutionMap::new();

    for (index, chunk) in chunks.iter().enumerate() {
        let matches = store
            .find_in(collection, &fields.reference_key, chunk)
            .await?;
        debug!(chunk = index, size = chunk.len(), matches = matches.len(), "chunk resolved");

        for entity in matches
            .iter()
            .filter_map(|doc| ReferenceEntity::from_document(doc, fields))
        {
            if let Some(value) = entity.resolved_value {
                map.insert(entity.name, value);
            }
        }
    }

    info!(
        chunks = chunks.len(),
        resolved = map.len(),
        unresolved = keys.len().saturating_sub(map.len()),
        "owner keys resolved"
    );

    Ok(map)
}
