//! Hybrid memory retrieval: markdown chunking, a dense-vector store with a
//! content-hash embedding cache, an FTS5/BM25 keyword index, and weighted
//! fusion of the two rankings.

pub mod chunk;
pub mod error;
pub mod fts;
pub mod hybrid;
pub mod vector;

pub use chunk::{split_into_chunks, MemoryChunk};
pub use error::{MemoryError, Result};
pub use fts::{FtsIndex, KeywordHit};
pub use hybrid::{HybridSearch, SearchHit};
pub use vector::{Embedder, HashEmbedder, VectorStore};
