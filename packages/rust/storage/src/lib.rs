//! libSQL-backed document store.
//!
//! The [`Storage`] struct keeps JSON documents grouped into named
//! collections and implements [`DocumentStore`], the seam the backfill
//! pipeline reads and writes through.
//!
//! **Access rules:**
//! - `backfill run`: read-write via [`Storage::open`]
//! - `backfill run --dry-run`: read-only via [`Storage::open_readonly`]
//!
//! The handle is opened once per run and released when dropped.

mod migrations;
mod store;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use backfill_shared::{BackfillError, Document, Result, WriteBatch};
use chrono::Utc;
use libsql::{Connection, Database, params};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use store::{DocumentStore, MAX_IN_VALUES, check_in_values};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    path: PathBuf,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BackfillError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BackfillError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| BackfillError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            path: path.to_path_buf(),
            readonly: false,
        };
        storage.run_migrations().await?;
        tracing::debug!(path = %path.display(), "document store opened");
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode. Commits and
    /// imports fail.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BackfillError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BackfillError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| BackfillError::Storage(e.to_string()))?;

        tracing::debug!(path = %path.display(), "document store opened read-only");
        Ok(Self {
            db,
            conn,
            path: path.to_path_buf(),
            readonly: true,
        })
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the handle.
    pub fn close(self) {
        tracing::debug!(path = %self.path.display(), "document store closed");
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BackfillError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> std::result::Result<(), String> {
        if self.readonly {
            return Err("database is opened in read-only mode".into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Insert or replace documents in `collection` inside one transaction.
    /// Returns the number of documents written.
    pub async fn import(&self, collection: &str, docs: &[Document]) -> Result<usize> {
        self.check_writable().map_err(BackfillError::Storage)?;
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| BackfillError::Storage(e.to_string()))?;

        for doc in docs {
            let data = serde_json::to_string(&doc.data)
                .map_err(|e| BackfillError::validation(format!("{}: {e}", doc.id)))?;
            let written = tx
                .execute(
                    "INSERT INTO documents (collection, id, data, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(collection, id) DO UPDATE SET
                       data = excluded.data,
                       updated_at = excluded.updated_at",
                    params![collection, doc.id.as_str(), data.as_str(), now.as_str()],
                )
                .await;
            if let Err(e) = written {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(collection, error = %rb, "import rollback failed");
                }
                return Err(BackfillError::Storage(format!("import {}: {e}", doc.id)));
            }
        }

        tx.commit()
            .await
            .map_err(|e| BackfillError::Storage(e.to_string()))?;
        tracing::info!(collection, count = docs.len(), "documents imported");
        Ok(docs.len())
    }

    /// Get a single document by collection and id.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .await
            .map_err(|e| BackfillError::read(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(BackfillError::read(e.to_string())),
        }
    }

    async fn collect_rows(mut rows: libsql::Rows) -> Result<Vec<Document>> {
        let mut results = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => results.push(row_to_document(&row)?),
                Ok(None) => break,
                Err(e) => return Err(BackfillError::read(e.to_string())),
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn scan(&self, collection: &str) -> Result<Vec<Document>> {
        let rows = self
            .conn
            .query(
                "SELECT id, data FROM documents WHERE collection = ?1 ORDER BY id",
                params![collection],
            )
            .await
            .map_err(|e| BackfillError::read(format!("scan {collection}: {e}")))?;

        Self::collect_rows(rows).await
    }

    async fn find_in(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Document>> {
        check_in_values(values)?;
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..values.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, data FROM documents
             WHERE collection = ?1 AND json_extract(data, ?2) IN ({placeholders})
             ORDER BY id"
        );

        let mut args: Vec<libsql::Value> = Vec::with_capacity(values.len() + 2);
        args.push(libsql::Value::Text(collection.to_string()));
        args.push(libsql::Value::Text(json_path(field)?));
        args.extend(values.iter().map(|v| libsql::Value::Text(v.clone())));

        let rows = self
            .conn
            .query(&sql, args)
            .await
            .map_err(|e| BackfillError::read(format!("lookup {collection}.{field}: {e}")))?;

        Self::collect_rows(rows).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<usize> {
        self.check_writable().map_err(BackfillError::commit)?;
        if batch.is_empty() {
            return Ok(0);
        }
        let paths = batch
            .updates()
            .iter()
            .map(|update| json_path(&update.field))
            .collect::<Result<Vec<_>>>()?;
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| BackfillError::commit(e.to_string()))?;

        let mut applied = 0;
        for (update, path) in batch.updates().iter().zip(&paths) {
            let outcome = tx
                .execute(
                    "UPDATE documents
                     SET data = json_set(data, ?1, ?2), updated_at = ?3
                     WHERE collection = ?4 AND id = ?5",
                    params![
                        path.as_str(),
                        update.value.as_str(),
                        now.as_str(),
                        update.collection.as_str(),
                        update.doc_id.as_str(),
                    ],
                )
                .await;

            let failure = match outcome {
                Ok(0) => Some(format!(
                    "no document {}/{}",
                    update.collection, update.doc_id
                )),
                Ok(_) => None,
                Err(e) => Some(format!("{}/{}: {e}", update.collection, update.doc_id)),
            };
            if let Some(message) = failure {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "commit rollback failed");
                }
                return Err(BackfillError::commit(message));
            }
            applied += 1;
        }

        tx.commit()
            .await
            .map_err(|e| BackfillError::commit(e.to_string()))?;
        Ok(applied)
    }
}

/// Parse an import payload: a JSON array of objects. A string `"id"` key
/// becomes the storage id and is removed from the data; otherwise a UUIDv7 is
/// assigned.
pub fn parse_documents(payload: Value) -> Result<Vec<Document>> {
    let Value::Array(items) = payload else {
        return Err(BackfillError::validation(
            "import file must contain a JSON array of documents",
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(mut data) => {
                let id = match data.remove("id") {
                    Some(Value::String(id)) if !id.is_empty() => id,
                    Some(other) => {
                        data.insert("id".into(), other);
                        Uuid::now_v7().to_string()
                    }
                    None => Uuid::now_v7().to_string(),
                };
                Ok(Document::new(id, data))
            }
            _ => Err(BackfillError::validation(format!(
                "import entry {i} is not a JSON object"
            ))),
        })
        .collect()
}

/// SQLite JSON path for a top-level key, quoted so names containing dots
/// address a single member. SQLite has no escape for `"` inside a quoted
/// label, so such names are rejected.
fn json_path(field: &str) -> Result<String> {
    if field.contains('"') {
        return Err(BackfillError::validation(format!(
            "field name {field:?} contains a double quote"
        )));
    }
    Ok(format!("$.\"{field}\""))
}

/// Convert a database row to a [`Document`].
fn row_to_document(row: &libsql::Row) -> Result<Document> {
    let id: String = row
        .get(0)
        .map_err(|e| BackfillError::read(e.to_string()))?;
    let raw: String = row
        .get(1)
        .map_err(|e| BackfillError::read(e.to_string()))?;
    let data: Map<String, Value> = serde_json::from_str(&raw)
        .map_err(|e| BackfillError::read(format!("document {id} is not a JSON object: {e}")))?;
    Ok(Document::new(id, data))
}
