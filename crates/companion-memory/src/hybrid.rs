//! Weighted fusion of the vector and keyword rankings.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::chunk::{split_into_chunks, MemoryChunk};
use crate::error::Result;
use crate::fts::FtsIndex;
use crate::vector::VectorStore;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub source: String,
    pub text: String,
    /// Fused score in [0, 1]; higher is better.
    pub score: f32,
}

pub struct HybridSearch {
    fts: FtsIndex,
    vectors: VectorStore,
    vector_weight: f32,
    keyword_weight: f32,
    min_vector_score: f32,
}

impl HybridSearch {
    pub fn new(
        fts: FtsIndex,
        vectors: VectorStore,
        vector_weight: f32,
        keyword_weight: f32,
        min_vector_score: f32,
    ) -> Self {
        Self {
            fts,
            vectors,
            vector_weight,
            keyword_weight,
            min_vector_score,
        }
    }

    /// Hybrid query. `context` (pinned context, typically) is appended to the
    /// text that gets embedded so the vector arm can break keyword ties.
    pub async fn search(
        &self,
        query: &str,
        context: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let fetch = top_k * 2;
        let vector_query = match context {
            Some(ctx) if !ctx.is_empty() => format!("{query}\n{ctx}"),
            _ => query.to_string(),
        };

        let (vector_hits, keyword_hits) = tokio::join!(
            self.vectors.search(&vector_query, fetch, self.min_vector_score),
            async { self.fts.search(query, fetch) },
        );
        let vector_hits = vector_hits?;
        let keyword_hits = keyword_hits?;

        // Normalize BM25 to [0,1] against this batch's [min,max] and invert
        // (raw BM25: lower = better).
        let kw_min = keyword_hits
            .iter()
            .map(|h| h.bm25_score)
            .fold(f64::INFINITY, f64::min);
        let kw_max = keyword_hits
            .iter()
            .map(|h| h.bm25_score)
            .fold(f64::NEG_INFINITY, f64::max);
        let normalize_kw = |score: f64| -> f32 {
            if keyword_hits.is_empty() || kw_max <= kw_min {
                1.0
            } else {
                (1.0 - (score - kw_min) / (kw_max - kw_min)) as f32
            }
        };

        // Deduplicate by a coarse key and accumulate both components.
        struct Fused {
            id: String,
            source: String,
            text: String,
            vector: f32,
            keyword: f32,
        }
        let mut fused: HashMap<String, Fused> = HashMap::new();

        for hit in &vector_hits {
            let key = dedup_key(&hit.source, &hit.text);
            let entry = fused.entry(key).or_insert_with(|| Fused {
                id: hit.id.clone(),
                source: hit.source.clone(),
                text: hit.text.clone(),
                vector: 0.0,
                keyword: 0.0,
            });
            entry.vector = entry.vector.max(hit.score);
        }
        for hit in &keyword_hits {
            let key = dedup_key(&hit.source, &hit.text);
            let entry = fused.entry(key).or_insert_with(|| Fused {
                id: hit.id.clone(),
                source: hit.source.clone(),
                text: hit.text.clone(),
                vector: 0.0,
                keyword: 0.0,
            });
            entry.keyword = entry.keyword.max(normalize_kw(hit.bm25_score));
        }

        let mut hits: Vec<SearchHit> = fused
            .into_values()
            .map(|f| SearchHit {
                score: self.vector_weight * f.vector + self.keyword_weight * f.keyword,
                id: f.id,
                source: f.source,
                text: f.text,
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        debug!(
            query,
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            fused = hits.len(),
            "hybrid search"
        );
        Ok(hits)
    }

    /// Rebuild both indices from the given `(source, markdown)` documents.
    /// The FTS side is rebuilt eagerly in one transaction; the vector side is
    /// invalidated and rebuilds lazily on the next query.
    pub fn reindex_all(&self, documents: &[(String, String)]) -> Result<usize> {
        let mut chunks: Vec<MemoryChunk> = Vec::new();
        for (source, text) in documents {
            chunks.extend(split_into_chunks(source, text));
        }

        self.fts.clear()?;
        self.fts.insert_batch(&chunks)?;
        self.vectors.set_corpus(chunks.clone());

        info!(sources = documents.len(), chunks = chunks.len(), "memory reindexed");
        Ok(chunks.len())
    }

    pub fn indexed_chunks(&self) -> Result<usize> {
        self.fts.count()
    }

    pub async fn warm_vector_count(&self) -> usize {
        self.vectors.len().await
    }
}

fn dedup_key(source: &str, text: &str) -> String {
    let prefix: String = text.chars().take(100).collect();
    format!("{source}|{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::HashEmbedder;
    use std::sync::Arc;

    fn engine() -> HybridSearch {
        HybridSearch::new(
            FtsIndex::open_in_memory().unwrap(),
            VectorStore::new(Arc::new(HashEmbedder::new())),
            0.7,
            0.3,
            0.2,
        )
    }

    fn docs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(s, t)| (s.to_string(), t.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn reindex_counts_match_both_indices() {
        let eng = engine();
        let n = eng
            .reindex_all(&docs(&[("a.md", "## One\nalpha\n## Two\nbeta"), ("b.md", "gamma")]))
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(eng.indexed_chunks().unwrap(), 3);

        // Vector cache warms on first query.
        let _ = eng.search("alpha", None, 3).await.unwrap();
        assert_eq!(eng.warm_vector_count().await, 3);
    }

    #[tokio::test]
    async fn tea_query_returns_tea_chunks() {
        let eng = engine();
        eng.reindex_all(&docs(&[(
            "mem.md",
            "## Prefs\nlikes tea\n## More\nlikes coffee\n## Dislikes\nhates tea",
        )]))
        .unwrap();

        let hits = eng.search("tea", None, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        for hit in &hits {
            assert!(hit.text.contains("tea"), "unexpected hit: {}", hit.text);
        }
    }

    #[tokio::test]
    async fn pinned_context_breaks_keyword_ties() {
        let eng = engine();
        eng.reindex_all(&docs(&[(
            "mem.md",
            "## A\nlikes tea\n## B\nlikes coffee\n## C\nhates tea",
        )]))
        .unwrap();

        let hits = eng.search("tea", Some("likes"), 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("likes tea"));
    }

    #[tokio::test]
    async fn duplicate_chunks_are_deduped() {
        let eng = engine();
        eng.reindex_all(&docs(&[
            ("a.md", "likes tea"),
            ("a.md", "likes tea"), // same source + prefix
        ]))
        .unwrap();

        let hits = eng.search("tea", None, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn reindex_replaces_previous_content() {
        let eng = engine();
        eng.reindex_all(&docs(&[("a.md", "old fact")])).unwrap();
        eng.reindex_all(&docs(&[("a.md", "new fact")])).unwrap();

        let hits = eng.search("old", None, 5).await.unwrap();
        assert!(hits.iter().all(|h| !h.text.contains("old fact")) || hits.is_empty());
        assert_eq!(eng.indexed_chunks().unwrap(), 1);
    }
}
