//! In-memory vector index and corpus store.
//!
//! Used by the core's own tests and by callers that want retrieval over a
//! transient corpus without a database. Brute-force L2 scan, same ranking
//! semantics as the persistent index.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::l2_distance;
use crate::models::Chunk;
use crate::traits::{CorpusStore, VectorHit, VectorIndex};

/// A chunk paired with its embedding, held entirely in memory.
pub struct InMemoryIndex {
    entries: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Add a chunk with its embedding.
    pub fn add(&self, chunk: Chunk, embedding: Vec<f32>) {
        self.entries
            .write()
            .expect("index lock poisoned")
            .push((chunk, embedding));
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(&self, query_vec: &[f32], top_n: usize) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read().expect("index lock poisoned");
        let mut hits: Vec<VectorHit> = entries
            .iter()
            .map(|(chunk, embedding)| VectorHit {
                chunk: chunk.clone(),
                distance: l2_distance(query_vec, embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_n);
        Ok(hits)
    }
}

#[async_trait]
impl CorpusStore for InMemoryIndex {
    async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let entries = self.entries.read().expect("index lock poisoned");
        Ok(entries.iter().map(|(chunk, _)| chunk.clone()).collect())
    }
}
