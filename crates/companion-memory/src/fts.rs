//! BM25 keyword index backed by an FTS5 virtual table.
//!
//! The index lives in its own sidecar database file next to the memory
//! files. FTS5's `bm25()` ranks matches with numerically lower = better;
//! that raw score is surfaced and normalized later by the fusion step.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::chunk::MemoryChunk;
use crate::error::Result;

pub struct FtsIndex {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub id: String,
    pub source: String,
    pub text: String,
    /// Raw BM25 score — lower is better.
    pub bm25_score: f64,
}

impl FtsIndex {
    /// Open (creating if needed) the index database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory index for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts
                USING fts5(chunk_id UNINDEXED, source UNINDEXED, body);",
        )?;
        Ok(())
    }

    /// Replace nothing — append the given chunks in one transaction.
    pub fn insert_batch(&self, chunks: &[MemoryChunk]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO memory_fts (chunk_id, source, body) VALUES (?1, ?2, ?3)",
            )?;
            for chunk in chunks {
                stmt.execute(rusqlite::params![chunk.id, chunk.source, chunk.text])?;
            }
        }
        tx.commit()?;
        debug!(count = chunks.len(), "fts batch inserted");
        Ok(())
    }

    /// Drop every indexed chunk.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memory_fts", [])?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM memory_fts", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// BM25-ranked keyword search. The raw query is normalized into an
    /// OR-of-quoted-tokens FTS expression first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        let Some(fts_query) = normalize_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT chunk_id, source, body, bm25(memory_fts) AS score
             FROM memory_fts
             WHERE memory_fts MATCH ?1
             ORDER BY score
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![fts_query, limit as i64], |row| {
            Ok(KeywordHit {
                id: row.get(0)?,
                source: row.get(1)?,
                text: row.get(2)?,
                bm25_score: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

/// Normalize a free-text query for FTS5: keep alphanumeric and Hangul runs,
/// quote each token, join with OR. Returns `None` when nothing survives.
fn normalize_query(query: &str) -> Option<String> {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || is_hangul(c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .map(|t| format!("\"{t}\""))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::split_into_chunks;

    fn index_with(texts: &[&str]) -> FtsIndex {
        let idx = FtsIndex::open_in_memory().unwrap();
        let chunks: Vec<MemoryChunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| MemoryChunk {
                id: format!("mem:{i}"),
                source: "mem".to_string(),
                text: t.to_string(),
            })
            .collect();
        idx.insert_batch(&chunks).unwrap();
        idx
    }

    #[test]
    fn normalize_strips_punctuation_and_quotes_tokens() {
        let q = normalize_query("likes: tea!").unwrap();
        assert_eq!(q, "\"likes\" OR \"tea\"");
    }

    #[test]
    fn normalize_keeps_hangul() {
        let q = normalize_query("녹차 좋아").unwrap();
        assert_eq!(q, "\"녹차\" OR \"좋아\"");
    }

    #[test]
    fn normalize_empty_is_none() {
        assert!(normalize_query("!!! ???").is_none());
    }

    #[test]
    fn search_ranks_matches_lower_is_better() {
        let idx = index_with(&["likes tea", "likes coffee", "hates tea"]);
        let hits = idx.search("tea", 10).unwrap();
        assert_eq!(hits.len(), 2);
        for hit in &hits {
            assert!(hit.text.contains("tea"));
            assert!(hit.bm25_score <= 0.0, "bm25 scores are negative for matches");
        }
    }

    #[test]
    fn clear_then_count_is_zero() {
        let idx = index_with(&["one", "two"]);
        assert_eq!(idx.count().unwrap(), 2);
        idx.clear().unwrap();
        assert_eq!(idx.count().unwrap(), 0);
    }

    #[test]
    fn chunked_document_is_fully_indexed() {
        let idx = FtsIndex::open_in_memory().unwrap();
        let chunks = split_into_chunks("notes.md", "## Tea\ngreen tea\n## Coffee\nespresso");
        idx.insert_batch(&chunks).unwrap();
        assert_eq!(idx.count().unwrap(), chunks.len());
    }
}
