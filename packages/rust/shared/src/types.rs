//! Core domain types shared by the store and the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A stored document: store-assigned identifier plus its field data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Storage identifier, unique within a collection.
    pub id: String,
    /// Top-level fields.
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Raw value of a top-level field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// A top-level string field, or `None` if absent, not a string, or empty.
    pub fn non_empty_str(&self, name: &str) -> Option<&str> {
        match self.data.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// True when the field is absent, null, or an empty string.
    pub fn is_blank(&self, name: &str) -> bool {
        match self.data.get(name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk writes
// ---------------------------------------------------------------------------

/// A single-field update on one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub collection: String,
    pub doc_id: String,
    pub field: String,
    pub value: String,
}

/// Field updates accumulated for one atomic commit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    updates: Vec<FieldUpdate>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `field = value` on `collection/doc_id`.
    pub fn update(
        &mut self,
        collection: impl Into<String>,
        doc_id: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.updates.push(FieldUpdate {
            collection: collection.into(),
            doc_id: doc_id.into(),
            field: field.into(),
            value: value.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &[FieldUpdate] {
        &self.updates
    }

    pub fn into_updates(self) -> Vec<FieldUpdate> {
        self.updates
    }
}
