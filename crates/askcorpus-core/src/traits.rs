//! Trait seams for external collaborators.
//!
//! The core never talks to a database or an LLM directly. The application
//! provides implementations of these traits; the core only depends on the
//! contracts. All traits are async (via `async-trait`) and `Send + Sync`
//! so implementations can be shared across request-handling tasks.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;

/// A hit returned from the nearest-neighbor vector index.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Distance in embedding space; lower means more similar.
    pub distance: f64,
}

/// Opaque nearest-neighbor search over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return the `top_n` chunks closest to `query_vec`, ordered by
    /// ascending distance.
    async fn search(&self, query_vec: &[f32], top_n: usize) -> Result<Vec<VectorHit>>;
}

/// Read access to the full chunk corpus, used to build the lexical
/// snapshot.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Every chunk currently in the corpus. Expensive; called once per
    /// lexical index build.
    async fn all_chunks(&self) -> Result<Vec<Chunk>>;
}

/// Text-to-vector embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Text generation (the LLM).
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
    ) -> Result<String>;
}
