//! Dense-vector side of the hybrid engine.
//!
//! The embedding backend is pluggable behind [`Embedder`]; the store only
//! mandates the cosine-similarity contract. Embeddings are cached by a
//! SHA-256 hash of the chunk text, so re-indexing unchanged chunks never
//! re-embeds them. Invalidation marks the index stale; the rebuild happens
//! lazily on the next query, single-flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::chunk::MemoryChunk;
use crate::error::{MemoryError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub source: String,
    pub text: String,
    /// Cosine similarity in [-1, 1]; higher is better.
    pub score: f32,
}

struct VectorEntry {
    chunk: MemoryChunk,
    embedding: Vec<f32>,
}

pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    /// content-hash → embedding; survives invalidation.
    cache: Mutex<HashMap<String, Vec<f32>>>,
    entries: tokio::sync::RwLock<Vec<VectorEntry>>,
    /// Chunk set the next rebuild will index.
    corpus: Mutex<Vec<MemoryChunk>>,
    stale: AtomicBool,
    /// Single-flight guard for the lazy rebuild.
    rebuild: tokio::sync::Mutex<()>,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            cache: Mutex::new(HashMap::new()),
            entries: tokio::sync::RwLock::new(Vec::new()),
            corpus: Mutex::new(Vec::new()),
            stale: AtomicBool::new(false),
            rebuild: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the chunk set and mark the index stale. The embedding work is
    /// deferred to the next query.
    pub fn set_corpus(&self, chunks: Vec<MemoryChunk>) {
        *self.corpus.lock().unwrap() = chunks;
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Mark the index stale without touching the corpus.
    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Number of indexed chunks (after warm-up).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cosine-similarity search. Rebuilds first when stale.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f32) -> Result<Vec<VectorHit>> {
        self.ensure_fresh().await?;

        let query_vec = self.embedder.embed(query).await?;
        let entries = self.entries.read().await;

        let mut hits: Vec<VectorHit> = entries
            .iter()
            .filter_map(|e| {
                let score = cosine_similarity(&query_vec, &e.embedding);
                (score >= min_score).then(|| VectorHit {
                    id: e.chunk.id.clone(),
                    source: e.chunk.source.clone(),
                    text: e.chunk.text.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn ensure_fresh(&self) -> Result<()> {
        if !self.stale.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _flight = self.rebuild.lock().await;
        // Re-check: another task may have rebuilt while we waited.
        if !self.stale.load(Ordering::SeqCst) {
            return Ok(());
        }

        let corpus = self.corpus.lock().unwrap().clone();
        let mut new_entries = Vec::with_capacity(corpus.len());
        for chunk in corpus {
            let key = content_hash(&chunk.text);
            let cached = self.cache.lock().unwrap().get(&key).cloned();
            let embedding = match cached {
                Some(v) => v,
                None => {
                    let v = self.embedder.embed(&chunk.text).await?;
                    self.cache.lock().unwrap().insert(key, v.clone());
                    v
                }
            };
            new_entries.push(VectorEntry { chunk, embedding });
        }

        let count = new_entries.len();
        *self.entries.write().await = new_entries;
        self.stale.store(false, Ordering::SeqCst);
        debug!(count, "vector index rebuilt");
        Ok(())
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ---------------------------------------------------------------------------
// Default embedder — deterministic feature hashing
// ---------------------------------------------------------------------------

/// Feature-hashing embedder: lowercased words and character trigrams hashed
/// into a fixed-dimension signed vector, unit-normalized. Deterministic and
/// dependency-free; real deployments can inject an HTTP-backed [`Embedder`]
/// instead.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { dims: 256 }
    }

    fn features(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut feats: Vec<String> = lower.split_whitespace().map(String::from).collect();
        let chars: Vec<char> = lower.chars().filter(|c| !c.is_whitespace()).collect();
        for window in chars.windows(3) {
            feats.push(window.iter().collect());
        }
        feats
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dims];
        for feat in Self::features(text) {
            let h = fnv1a(feat.as_bytes());
            let idx = (h as usize) % self.dims;
            // One hash bit decides the sign — keeps collisions from only
            // ever adding up.
            let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
            vec[idx] += sign;
        }

        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(MemoryError::Embedding("empty feature set".to_string()));
        }
        for v in &mut vec {
            *v /= norm;
        }
        Ok(vec)
    }
}

/// FNV-1a — stable across processes, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> MemoryChunk {
        MemoryChunk {
            id: id.to_string(),
            source: "mem".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new();
        let a = e.embed("likes green tea").await.unwrap();
        let b = e.embed("likes green tea").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let e = HashEmbedder::new();
        let tea = e.embed("likes tea").await.unwrap();
        let tea2 = e.embed("tea likes").await.unwrap();
        let rocket = e.embed("orbital rocket launch").await.unwrap();
        assert!(cosine_similarity(&tea, &tea2) > cosine_similarity(&tea, &rocket));
    }

    #[tokio::test]
    async fn search_returns_best_match_first() {
        let store = VectorStore::new(Arc::new(HashEmbedder::new()));
        store.set_corpus(vec![
            chunk("m:0", "likes tea"),
            chunk("m:1", "likes coffee"),
            chunk("m:2", "weather in Seoul"),
        ]);

        let hits = store.search("tea", 2, 0.0).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "m:0");
    }

    #[tokio::test]
    async fn invalidate_triggers_lazy_rebuild() {
        let store = VectorStore::new(Arc::new(HashEmbedder::new()));
        store.set_corpus(vec![chunk("m:0", "alpha")]);
        let _ = store.search("alpha", 1, 0.0).await.unwrap();
        assert_eq!(store.len().await, 1);

        store.set_corpus(vec![chunk("m:0", "alpha"), chunk("m:1", "beta")]);
        // Not rebuilt until queried.
        assert_eq!(store.len().await, 1);
        let _ = store.search("beta", 1, 0.0).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn min_score_filters_weak_matches() {
        let store = VectorStore::new(Arc::new(HashEmbedder::new()));
        store.set_corpus(vec![chunk("m:0", "completely unrelated topic")]);
        let hits = store.search("tea", 5, 0.9).await.unwrap();
        assert!(hits.is_empty());
    }
}
