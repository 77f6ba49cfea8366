//! Vector index on SQLite and sqlite-vec.
//!
//! Stands in for an external vector engine: chunk payloads live in a regular
//! table, vectors in a `vec0` virtual table sharing the row id. Every logical
//! write is one transaction, so readers on the same connection see either the
//! previous or the new namespace contents and a dropped call rolls back.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, Once};

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::{debug, info};

use crate::embedder::l2_normalize;

use super::{
    ChunkPayload, DEFAULT_UPSERT_BATCH_SIZE, IndexEntry, IndexError, IndexStats, METRIC,
    SearchHit, VectorIndex, check_query, check_vector, dedup_last, rank,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    entry_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    content TEXT NOT NULL,
    token_start INTEGER NOT NULL,
    token_end INTEGER NOT NULL,
    char_start INTEGER NOT NULL,
    char_end INTEGER NOT NULL,
    UNIQUE(namespace, entry_id)
);

CREATE INDEX IF NOT EXISTS idx_entries_namespace ON entries(namespace);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// SQLite-backed [`VectorIndex`].
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
    upsert_batch_size: usize,
}

impl SqliteIndex {
    /// Open (or create) an index database at `path` for the given model.
    ///
    /// A database built with a different model or dimensionality is refused,
    /// since its stored vectors are not comparable with new queries.
    pub fn open<P: AsRef<Path>>(
        path: P,
        model_id: &str,
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        let path = path.as_ref();
        info!("Initializing vector index database: {}", path.display());

        init_sqlite_vec();
        let conn = Connection::open(path)?;
        Self::init(conn, model_id, dimensions)
    }

    /// Open an in-memory index (useful for testing).
    pub fn open_in_memory(model_id: &str, dimensions: usize) -> Result<Self, IndexError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, model_id, dimensions)
    }

    /// Rows written per insert group inside one transaction.
    #[must_use]
    pub fn with_upsert_batch_size(mut self, batch_size: usize) -> Self {
        self.upsert_batch_size = batch_size.max(1);
        self
    }

    fn init(conn: Connection, model_id: &str, dimensions: usize) -> Result<Self, IndexError> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_entries USING vec0(embedding FLOAT[{dimensions}]);"
        ))?;

        check_meta(&conn, "model", model_id)?;
        check_meta(&conn, "dimensions", &dimensions.to_string())?;
        check_meta(&conn, "metric", METRIC)?;

        info!("Vector index ready (model={model_id}, dimensions={dimensions})");

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, IndexError> {
        self.conn
            .lock()
            .map_err(|e| IndexError::Backend(format!("lock poisoned: {e}")))
    }

    fn write_entries(
        &self,
        tx: &Transaction<'_>,
        namespace: &str,
        entries: &[IndexEntry],
    ) -> Result<(), IndexError> {
        for (batch_no, batch) in entries.chunks(self.upsert_batch_size).enumerate() {
            let mut find =
                tx.prepare_cached("SELECT id FROM entries WHERE namespace = ? AND entry_id = ?")?;
            let mut insert = tx.prepare_cached(
                r#"
                INSERT INTO entries
                    (namespace, entry_id, position, content, token_start, token_end, char_start, char_end)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;

            for entry in batch {
                let existing: Option<i64> = find
                    .query_row(params![namespace, entry.id], |row| row.get(0))
                    .optional()?;
                if let Some(row_id) = existing {
                    // Virtual table cascade deletion workaround
                    tx.execute("DELETE FROM vec_entries WHERE rowid = ?", params![row_id])?;
                    tx.execute("DELETE FROM entries WHERE id = ?", params![row_id])?;
                }

                let p = &entry.payload;
                insert.execute(params![
                    namespace,
                    entry.id,
                    p.position as i64,
                    p.text,
                    p.token_start as i64,
                    p.token_end as i64,
                    p.char_start as i64,
                    p.char_end as i64,
                ])?;
                let row_id = tx.last_insert_rowid();

                let vector_blob = serialize_vector(&l2_normalize(&entry.vector));
                tx.execute(
                    "INSERT INTO vec_entries (rowid, embedding) VALUES (?, ?)",
                    params![row_id, vector_blob],
                )?;
            }

            debug!(
                "Wrote batch {} ({} entries) to namespace {namespace}",
                batch_no + 1,
                batch.len()
            );
        }
        Ok(())
    }

    fn clear_namespace(tx: &Transaction<'_>, namespace: &str) -> Result<usize, IndexError> {
        tx.execute(
            "DELETE FROM vec_entries WHERE rowid IN (SELECT id FROM entries WHERE namespace = ?)",
            params![namespace],
        )?;
        let removed = tx.execute("DELETE FROM entries WHERE namespace = ?", params![namespace])?;
        Ok(removed)
    }

    fn check_entries(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        entries
            .iter()
            .try_for_each(|e| check_vector(&e.vector, self.dimensions))
    }
}

/// Record `value` under `key` on first open; refuse a different stored value.
fn check_meta(conn: &Connection, key: &str, value: &str) -> Result<(), IndexError> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(stored) if stored != value => Err(IndexError::InvalidInput(format!(
            "index was built with {key}={stored}, refusing to use it with {key}={value}"
        ))),
        Some(_) => Ok(()),
        None => {
            conn.execute(
                "INSERT INTO index_meta (key, value) VALUES (?, ?)",
                params![key, value],
            )?;
            Ok(())
        }
    }
}

fn map_hit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchHit> {
    let score: f64 = row.get(7)?;
    Ok(SearchHit {
        id: row.get(0)?,
        payload: ChunkPayload {
            position: row.get::<_, i64>(1)? as usize,
            text: row.get(2)?,
            token_start: row.get::<_, i64>(3)? as usize,
            token_end: row.get::<_, i64>(4)? as usize,
            char_start: row.get::<_, i64>(5)? as usize,
            char_end: row.get::<_, i64>(6)? as usize,
        },
        score: score as f32,
    })
}

impl VectorIndex for SqliteIndex {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&self, namespace: &str, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        self.check_entries(&entries)?;
        let entries = dedup_last(entries);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        self.write_entries(&tx, namespace, &entries)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_namespace(
        &self,
        namespace: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), IndexError> {
        self.check_entries(&entries)?;
        let entries = dedup_last(entries);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = Self::clear_namespace(&tx, namespace)?;
        self.write_entries(&tx, namespace, &entries)?;
        tx.commit()?;

        debug!(
            "Replaced namespace {namespace}: removed {removed}, wrote {}",
            entries.len()
        );
        Ok(())
    }

    fn search(
        &self,
        namespace: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        check_query(query, top_k, self.dimensions)?;

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT
                e.entry_id,
                e.position,
                e.content,
                e.token_start,
                e.token_end,
                e.char_start,
                e.char_end,
                1.0 - vec_distance_cosine(v.embedding, ?) AS score
            FROM entries e
            JOIN vec_entries v ON v.rowid = e.id
            WHERE e.namespace = ?
            ORDER BY score DESC, e.token_start ASC, e.entry_id ASC
            LIMIT ?
            "#,
        )?;

        let query_blob = serialize_vector(&l2_normalize(query));
        let rows = stmt.query_map(
            params![query_blob, namespace, top_k as i64],
            map_hit_row,
        )?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }

        rank(&mut hits);
        Ok(hits)
    }

    fn delete_namespace(&self, namespace: &str) -> Result<bool, IndexError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = Self::clear_namespace(&tx, namespace)?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn stats(&self) -> Result<IndexStats, IndexError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT namespace, COUNT(*) FROM entries GROUP BY namespace")?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((name, count as usize))
        })?;

        let mut namespaces = BTreeMap::new();
        for row in rows {
            let (name, count) = row?;
            namespaces.insert(name, count);
        }

        Ok(IndexStats {
            backend: self.backend(),
            metric: METRIC,
            dimensions: self.dimensions,
            total_entries: namespaces.values().sum(),
            namespaces,
        })
    }
}
