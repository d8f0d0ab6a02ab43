//! Per-scope content-addressed chunk store: a SQLite table augmented by an
//! FTS5 full-text index and a sqlite-vec (or in-memory fallback) vector
//! index. One `Store` per scope (see `memory::scope`).

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::memory::chunk::Chunk;
use crate::memory::embeddings::cosine_similarity;

static VEC_EXTENSION_INIT: std::sync::Once = std::sync::Once::new();

fn register_vec_extension() {
    VEC_EXTENSION_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(),
        >(
            sqlite_vec::sqlite3_vec_init as *const ()
        )));
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_chunks: u64,
    pub total_tokens: u64,
    pub by_type: HashMap<String, (u64, u64)>,
}

pub struct Store {
    conn: Connection,
    dimension: usize,
    has_vec: bool,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `db_path` and ensure
    /// its schema. Falls back to an in-memory cosine scan if the sqlite-vec
    /// extension can't be loaded, rather than failing to start.
    pub fn open(db_path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        register_vec_extension();

        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open store at {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::ensure_schema(&conn)?;
        let has_vec = Self::ensure_vec_table(&conn, dimension);
        if !has_vec {
            tracing::warn!("sqlite-vec extension unavailable; falling back to in-memory cosine scan");
        }

        Ok(Self {
            conn,
            dimension,
            has_vec,
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id              TEXT PRIMARY KEY,
                uri             TEXT NOT NULL,
                content         TEXT NOT NULL,
                content_hash    TEXT NOT NULL,
                parent_dir      TEXT NOT NULL,
                memory_type     TEXT NOT NULL DEFAULT '',
                section         TEXT NOT NULL DEFAULT '',
                importance      INTEGER NOT NULL DEFAULT 1,
                reinforcement   INTEGER NOT NULL DEFAULT 0,
                access_count    INTEGER NOT NULL DEFAULT 0,
                token_count     INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                embedding       BLOB
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_uri ON chunks(uri);
            CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash);
            CREATE INDEX IF NOT EXISTS idx_chunks_parent_dir ON chunks(parent_dir);

            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content, section, uri,
                content='chunks', content_rowid='rowid'
            );

            CREATE TABLE IF NOT EXISTS embedding_cache (
                hash       TEXT PRIMARY KEY,
                embedding  BLOB NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn ensure_vec_table(conn: &Connection, dimension: usize) -> bool {
        let sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec USING vec0(id TEXT PRIMARY KEY, embedding float[{}])",
            dimension
        );
        conn.execute(&sql, []).is_ok()
    }

    // ---- upsert -------------------------------------------------------

    /// Idempotent on `content_hash`: if a chunk with the same `content_hash`
    /// already exists, mutable fields are updated and the vector is
    /// delete-then-reinserted; otherwise the chunk is inserted fresh.
    pub fn upsert(&mut self, chunk: &Chunk, embedding: &[f32]) -> Result<UpsertOutcome> {
        let tx = self.conn.transaction()?;

        let existing_id: Option<String> = tx
            .query_row(
                "SELECT id FROM chunks WHERE content_hash = ?1 AND uri = ?2",
                params![chunk.content_hash, chunk.uri],
                |r| r.get(0),
            )
            .optional()?;

        let outcome = if let Some(existing_id) = existing_id {
            let rowid: i64 = tx.query_row(
                "SELECT rowid FROM chunks WHERE id = ?1",
                params![existing_id],
                |r| r.get(0),
            )?;

            tx.execute(
                r#"UPDATE chunks SET uri=?1, section=?2, importance=?3, token_count=?4,
                   updated_at=?5, memory_type=?6, embedding=?7 WHERE id=?8"#,
                params![
                    chunk.uri,
                    chunk.section,
                    chunk.importance,
                    chunk.token_count as i64,
                    chunk.updated_at.to_rfc3339(),
                    chunk.memory_type,
                    embedding_to_blob(embedding),
                    existing_id,
                ],
            )?;

            tx.execute("DELETE FROM chunks_fts WHERE rowid = ?1", params![rowid])?;
            tx.execute(
                "INSERT INTO chunks_fts(rowid, content, section, uri) VALUES (?1, ?2, ?3, ?4)",
                params![rowid, chunk.content, chunk.section, chunk.uri],
            )?;

            if Self::ensure_vec_table(&tx, self.dimension) {
                tx.execute("DELETE FROM chunks_vec WHERE id = ?1", params![existing_id])?;
                tx.execute(
                    "INSERT INTO chunks_vec(id, embedding) VALUES (?1, ?2)",
                    params![existing_id, vec_blob(embedding)],
                )?;
            }

            UpsertOutcome::Updated
        } else {
            tx.execute(
                r#"INSERT INTO chunks
                   (id, uri, content, content_hash, parent_dir, memory_type, section,
                    importance, reinforcement, access_count, token_count,
                    created_at, updated_at, embedding)
                   VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"#,
                params![
                    chunk.id,
                    chunk.uri,
                    chunk.content,
                    chunk.content_hash,
                    chunk.parent_dir,
                    chunk.memory_type,
                    chunk.section,
                    chunk.importance,
                    chunk.reinforcement,
                    chunk.access_count,
                    chunk.token_count as i64,
                    chunk.created_at.to_rfc3339(),
                    chunk.updated_at.to_rfc3339(),
                    embedding_to_blob(embedding),
                ],
            )?;

            let rowid = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO chunks_fts(rowid, content, section, uri) VALUES (?1, ?2, ?3, ?4)",
                params![rowid, chunk.content, chunk.section, chunk.uri],
            )?;

            if Self::ensure_vec_table(&tx, self.dimension) {
                tx.execute(
                    "INSERT INTO chunks_vec(id, embedding) VALUES (?1, ?2)",
                    params![chunk.id, vec_blob(embedding)],
                )?;
            }

            UpsertOutcome::Inserted
        };

        tx.commit()?;
        Ok(outcome)
    }

    // ---- search ---------------------------------------------------------

    pub fn vector_search(
        &self,
        vec: &[f32],
        top_k: usize,
        parent_dir: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>> {
        if self.has_vec {
            self.vector_search_ann(vec, top_k, parent_dir)
        } else {
            self.vector_search_scan(vec, top_k, parent_dir)
        }
    }

    fn vector_search_ann(
        &self,
        vec: &[f32],
        top_k: usize,
        parent_dir: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>> {
        // Oversample so post-filtering by parent_dir still yields top_k.
        let k = (top_k * 4).max(top_k);
        let mut stmt = self.conn.prepare(
            "SELECT c.*, v.distance as distance FROM chunks_vec v
             JOIN chunks c ON c.id = v.id
             WHERE v.embedding MATCH ?1 AND k = ?2
             ORDER BY v.distance",
        )?;

        let rows = stmt.query_map(params![vec_blob(vec), k as i64], |row| {
            let chunk = row_to_chunk(row)?;
            let distance: f64 = row.get("distance")?;
            Ok((chunk, 1.0 - distance as f32))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (chunk, sim) = row?;
            if let Some(pd) = parent_dir
                && chunk.parent_dir != pd
            {
                continue;
            }
            out.push((chunk, sim));
            if out.len() >= top_k {
                break;
            }
        }
        Ok(out)
    }

    fn vector_search_scan(
        &self,
        vec: &[f32],
        top_k: usize,
        parent_dir: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>> {
        let mut stmt = if let Some(pd) = parent_dir {
            self.conn
                .prepare("SELECT * FROM chunks WHERE parent_dir = ?1 AND embedding IS NOT NULL")?
        } else {
            self.conn
                .prepare("SELECT * FROM chunks WHERE embedding IS NOT NULL")?
        };

        let rows = if let Some(pd) = parent_dir {
            stmt.query_map(params![pd], row_to_chunk)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([], row_to_chunk)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut scored: Vec<(Chunk, f32)> = Vec::with_capacity(rows.len());
        for chunk in rows {
            let blob: Vec<u8> = self.conn.query_row(
                "SELECT embedding FROM chunks WHERE id = ?1",
                params![chunk.id],
                |r| r.get(0),
            )?;
            let stored = blob_to_embedding(&blob);
            let sim = cosine_similarity(vec, &stored);
            scored.push((chunk, sim));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn fts_search(
        &self,
        query: &str,
        top_k: usize,
        parent_dir: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>> {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let sql = if parent_dir.is_some() {
            r#"SELECT c.*, bm25(chunks_fts) as rank FROM chunks_fts
               JOIN chunks c ON c.rowid = chunks_fts.rowid
               WHERE chunks_fts MATCH ?1 AND c.parent_dir = ?2
               ORDER BY rank LIMIT ?3"#
        } else {
            r#"SELECT c.*, bm25(chunks_fts) as rank FROM chunks_fts
               JOIN chunks c ON c.rowid = chunks_fts.rowid
               WHERE chunks_fts MATCH ?1
               ORDER BY rank LIMIT ?2"#
        };

        let mut stmt = self.conn.prepare(sql)?;
        let map_row = |row: &Row| -> rusqlite::Result<(Chunk, f32)> {
            let chunk = row_to_chunk(row)?;
            let rank: f64 = row.get("rank")?;
            // bm25() is negative-is-better in SQLite's FTS5; invert to a
            // positive relevance score for a consistent `rank` semantic.
            Ok((chunk, -rank as f32))
        };

        let rows = if let Some(pd) = parent_dir {
            stmt.query_map(params![fts_query, pd, top_k as i64], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![fts_query, top_k as i64], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(rows)
    }

    pub fn find_similar(
        &self,
        vec: &[f32],
        threshold: f32,
        parent_dir: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>> {
        let candidates = self.vector_search(vec, 20, parent_dir)?;
        Ok(candidates
            .into_iter()
            .filter(|(_, sim)| *sim >= threshold)
            .collect())
    }

    // ---- counters -------------------------------------------------------

    pub fn increment_reinforcement(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE chunks SET reinforcement = reinforcement + 1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn increment_access_count(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE chunks SET access_count = access_count + 1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    /// Batched access-count bump for a whole search result set, in one
    /// transaction, best-effort (failures are logged by the caller, not
    /// surfaced, per the Retriever's contract).
    pub fn increment_access_counts(&mut self, ids: &[String]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE chunks SET access_count = access_count + 1, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ---- deletion / convergence ------------------------------------------

    pub fn delete_by_uri(&mut self, uri: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE uri = ?1")?;
            stmt.query_map(params![uri], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        for id in &ids {
            let rowid: i64 =
                tx.query_row("SELECT rowid FROM chunks WHERE id = ?1", params![id], |r| r.get(0))?;
            tx.execute("DELETE FROM chunks_fts WHERE rowid = ?1", params![rowid])?;
            tx.execute("DELETE FROM chunks_vec WHERE id = ?1", params![id])
                .ok();
        }
        let removed = tx.execute("DELETE FROM chunks WHERE uri = ?1", params![uri])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Delete chunks for `uri` whose `content_hash` is not in `keep_hashes`.
    /// Used by the Indexer to converge a re-chunked file while preserving
    /// reinforcement/access counters for chunks that didn't change.
    pub fn delete_chunks_not_in(&mut self, uri: &str, keep_hashes: &HashSet<String>) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let stale: Vec<(String, i64)> = {
            let mut stmt = tx.prepare("SELECT id, content_hash, rowid FROM chunks WHERE uri = ?1")?;
            stmt.query_map(params![uri], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|(_, hash, _)| !keep_hashes.contains(hash))
            .map(|(id, _, rowid)| (id, rowid))
            .collect()
        };

        for (id, rowid) in &stale {
            tx.execute("DELETE FROM chunks_fts WHERE rowid = ?1", params![rowid])?;
            tx.execute("DELETE FROM chunks_vec WHERE id = ?1", params![id]).ok();
            tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(stale.len())
    }

    /// Look up a previously computed embedding by content hash, keyed the
    /// same way across every uri — identical content anywhere in the scope
    /// shares one embedding instead of paying the provider again.
    pub fn cached_embedding(&self, hash: &str) -> Result<Option<Vec<f32>>> {
        self.conn
            .query_row(
                "SELECT embedding FROM embedding_cache WHERE hash = ?1",
                params![hash],
                |r| r.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map(|blob| blob.map(|b| blob_to_embedding(&b)))
            .map_err(Into::into)
    }

    pub fn cache_embedding(&self, hash: &str, embedding: &[f32]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO embedding_cache (hash, embedding, created_at) VALUES (?1, ?2, ?3)",
            params![hash, embedding_to_blob(embedding), chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn chunks_for_uri(&self, uri: &str) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare("SELECT * FROM chunks WHERE uri = ?1")?;
        let rows = stmt
            .query_map(params![uri], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        self.conn
            .query_row("SELECT * FROM chunks WHERE id = ?1", params![id], row_to_chunk)
            .optional()
            .map_err(Into::into)
    }

    /// Distinct source URIs currently represented in the Store, used to
    /// check the "store URIs == on-disk files" convergence invariant.
    pub fn uris(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT uri FROM chunks")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        let total_chunks: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        let total_tokens: u64 = self
            .conn
            .query_row("SELECT COALESCE(SUM(token_count), 0) FROM chunks", [], |r| r.get(0))?;

        let mut by_type = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT memory_type, COUNT(*), COALESCE(SUM(token_count), 0) FROM chunks GROUP BY memory_type")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (t, chunks, tokens) = row?;
            by_type.insert(t, (chunks as u64, tokens as u64));
        }

        Ok(StoreStats {
            total_chunks,
            total_tokens,
            by_type,
        })
    }
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Chunk {
        id: row.get("id")?,
        uri: row.get("uri")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        parent_dir: row.get("parent_dir")?,
        memory_type: row.get("memory_type")?,
        section: row.get("section")?,
        importance: row.get::<_, i64>("importance")? as u8,
        reinforcement: row.get::<_, i64>("reinforcement")? as u32,
        access_count: row.get::<_, i64>("access_count")? as u32,
        token_count: row.get::<_, i64>("token_count")? as usize,
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
        start_line: 0,
        end_line: 0,
    })
}

fn parse_rfc3339(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

fn embedding_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn vec_blob(v: &[f32]) -> Vec<u8> {
    embedding_to_blob(v)
}

/// Build a safe FTS5 MATCH expression from free text: strip characters that
/// are syntactically meaningful to FTS5's query language and OR the
/// remaining tokens together so any term can match.
fn build_fts_query(query: &str) -> String {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric() || *c as u32 > 127)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    tokens.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::chunk::chunk as chunk_fn;
    use tempfile::tempdir;

    fn sample_chunk(uri: &str, content: &str) -> Chunk {
        chunk_fn(uri, content).into_iter().next().unwrap()
    }

    #[test]
    fn upsert_then_vector_search_roundtrips() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let c = sample_chunk("user/preferences.md", "# Prefs\n\n- likes rust\n");
        store.upsert(&c, &[1.0, 0.0, 0.0]).unwrap();

        let results = store.vector_search(&[1.0, 0.0, 0.0], 5, None).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].1 > 0.99);
    }

    #[test]
    fn upsert_is_idempotent_on_content_hash() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let c = sample_chunk("user/preferences.md", "# Prefs\n\n- likes rust\n");
        store.upsert(&c, &[1.0, 0.0, 0.0]).unwrap();
        store.upsert(&c, &[1.0, 0.0, 0.0]).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_chunks, 1);
    }

    #[test]
    fn delete_by_uri_removes_all_rows() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let c = sample_chunk("agent/decisions.md", "# D\n\n- chose postgres\n");
        store.upsert(&c, &[0.0, 1.0, 0.0]).unwrap();

        let removed = store.delete_by_uri("agent/decisions.md").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_stats().unwrap().total_chunks, 0);
    }

    #[test]
    fn reinforcement_and_access_counters_increment() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let c = sample_chunk("user/preferences.md", "# Prefs\n\n- likes rust\n");
        store.upsert(&c, &[1.0, 0.0, 0.0]).unwrap();

        store.increment_reinforcement(&c.id).unwrap();
        store.increment_access_count(&c.id).unwrap();

        let fetched = store.get_chunk(&c.id).unwrap().unwrap();
        assert_eq!(fetched.reinforcement, 1);
        assert_eq!(fetched.access_count, 1);
    }

    #[test]
    fn fts_search_finds_matching_term() {
        let dir = tempdir().unwrap();
        let mut store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let c = sample_chunk("user/preferences.md", "# Prefs\n\n- prefers FastAPI over Flask\n");
        store.upsert(&c, &[1.0, 0.0, 0.0]).unwrap();

        let results = store.fts_search("FastAPI", 5, None).unwrap();
        assert_eq!(results.len(), 1);
    }
}
