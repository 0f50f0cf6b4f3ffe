//! Hybrid retriever combining dense vector search with BM25 ranking.
//!
//! The lexical snapshot is built lazily on the first hybrid query and then
//! reused. Building is serialized behind a write lock, so concurrent first
//! queries produce exactly one corpus scan; later callers only take a read
//! lock on the hot path.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::fusion::{dense_similarity, reciprocal_rank_fusion, FusionConfig};
use crate::lexical::{LexicalHit, LexicalIndex};
use crate::models::RetrievalResult;
use crate::traits::{CorpusStore, Embedder, VectorIndex};

enum LexicalState {
    NotBuilt,
    /// The corpus was empty at build time; hybrid queries degrade to
    /// dense-only until a rebuild.
    Empty,
    Ready(Arc<LexicalIndex>),
}

pub struct HybridRetriever {
    vector_index: Arc<dyn VectorIndex>,
    corpus: Arc<dyn CorpusStore>,
    embedder: Arc<dyn Embedder>,
    fusion: FusionConfig,
    lexical: RwLock<LexicalState>,
}

impl HybridRetriever {
    pub fn new(
        vector_index: Arc<dyn VectorIndex>,
        corpus: Arc<dyn CorpusStore>,
        embedder: Arc<dyn Embedder>,
        fusion: FusionConfig,
    ) -> Self {
        Self {
            vector_index,
            corpus,
            embedder,
            fusion,
            lexical: RwLock::new(LexicalState::NotBuilt),
        }
    }

    /// Hybrid retrieval: dense and lexical candidates fused by reciprocal
    /// rank.
    ///
    /// The dense side always embeds `query` as the user typed it. When
    /// `lexical_query` is given (a reformulated or expanded variant), it
    /// replaces `query` on the lexical side only, so reformulation noise
    /// cannot shift the embedding.
    ///
    /// Falls back to dense-only results when the corpus has no lexical
    /// content.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        lexical_query: Option<&str>,
    ) -> Result<Vec<RetrievalResult>> {
        let Some(index) = self.lexical_index().await? else {
            return self.retrieve_dense(query, top_k).await;
        };

        // Over-fetch both sides so fusion has room to reorder.
        let candidates = top_k * 2;

        let query_vec = self.embedder.embed(query).await?;
        let dense = self.vector_index.search(&query_vec, candidates).await?;

        let lexical_text = lexical_query.unwrap_or(query);
        let lexical: Vec<LexicalHit> = index.query(lexical_text, candidates);

        Ok(reciprocal_rank_fusion(&dense, &lexical, &self.fusion, top_k))
    }

    /// Dense-only retrieval. The fused score is the dense similarity, so
    /// downstream consumers see one score field either way.
    pub async fn retrieve_dense(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let query_vec = self.embedder.embed(query).await?;
        let hits = self.vector_index.search(&query_vec, top_k).await?;

        Ok(hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let mut result = RetrievalResult::from_chunk(&hit.chunk);
                let similarity = dense_similarity(hit.distance);
                result.dense_score = Some(similarity);
                result.dense_rank = Some(i + 1);
                result.fused_score = similarity;
                result
            })
            .collect())
    }

    /// Drop the lexical snapshot so the next query rebuilds it. Call after
    /// ingesting new content.
    pub async fn rebuild(&self) {
        let mut state = self.lexical.write().await;
        *state = LexicalState::NotBuilt;
    }

    /// Get the lexical index, building it on first use.
    async fn lexical_index(&self) -> Result<Option<Arc<LexicalIndex>>> {
        {
            let state = self.lexical.read().await;
            match &*state {
                LexicalState::Ready(index) => return Ok(Some(index.clone())),
                LexicalState::Empty => return Ok(None),
                LexicalState::NotBuilt => {}
            }
        }

        // Double-checked under the write lock; holding it across the
        // corpus fetch means concurrent first queries wait here instead
        // of each scanning the corpus.
        let mut state = self.lexical.write().await;
        match &*state {
            LexicalState::Ready(index) => return Ok(Some(index.clone())),
            LexicalState::Empty => return Ok(None),
            LexicalState::NotBuilt => {}
        }

        let chunks = self.corpus.all_chunks().await?;
        match LexicalIndex::build(chunks) {
            Some(index) => {
                let index = Arc::new(index);
                *state = LexicalState::Ready(index.clone());
                Ok(Some(index))
            }
            None => {
                *state = LexicalState::Empty;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;
    use crate::models::{Chunk, ChunkMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0, 0.0])
        }
    }

    struct CountingCorpus {
        inner: Arc<InMemoryIndex>,
        scans: AtomicUsize,
    }

    #[async_trait]
    impl CorpusStore for CountingCorpus {
        async fn all_chunks(&self) -> Result<Vec<Chunk>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.all_chunks().await
        }
    }

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    fn seeded_index() -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        index.add(
            chunk("c1", "salesforce development services"),
            vec![1.0, 0.0],
        );
        index.add(chunk("c2", "low code platform outsystems"), vec![0.0, 1.0]);
        index.add(chunk("c3", "company culture and careers"), vec![1.0, 1.0]);
        index
    }

    fn retriever(index: Arc<InMemoryIndex>) -> HybridRetriever {
        HybridRetriever::new(
            index.clone(),
            index,
            Arc::new(FixedEmbedder),
            FusionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_lexical_match_wins_under_tied_dense_scores() {
        // The fixed embedder gives every query the same vector, so dense
        // scores alone cannot separate the chunks; the lexical overlap
        // with c1 must.
        let retriever = retriever(seeded_index());
        let results = retriever.retrieve("salesforce help", 2, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "c1");
        assert!(results[0].lexical_rank.is_some());
        assert!(results.iter().all(|r| r.chunk_id != "c3"));
    }

    #[tokio::test]
    async fn test_lexical_built_once() {
        let inner = seeded_index();
        let corpus = Arc::new(CountingCorpus {
            inner: inner.clone(),
            scans: AtomicUsize::new(0),
        });
        let retriever = HybridRetriever::new(
            inner,
            corpus.clone(),
            Arc::new(FixedEmbedder),
            FusionConfig::default(),
        );

        retriever.retrieve("salesforce", 3, None).await.unwrap();
        retriever.retrieve("outsystems", 3, None).await.unwrap();
        retriever.retrieve("careers", 3, None).await.unwrap();

        assert_eq!(corpus.scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rebuild_triggers_new_scan() {
        let inner = seeded_index();
        let corpus = Arc::new(CountingCorpus {
            inner: inner.clone(),
            scans: AtomicUsize::new(0),
        });
        let retriever = HybridRetriever::new(
            inner,
            corpus.clone(),
            Arc::new(FixedEmbedder),
            FusionConfig::default(),
        );

        retriever.retrieve("salesforce", 3, None).await.unwrap();
        retriever.rebuild().await;
        retriever.retrieve("salesforce", 3, None).await.unwrap();

        assert_eq!(corpus.scans.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_corpus_degrades_to_dense() {
        let index = Arc::new(InMemoryIndex::new());
        let retriever = retriever(index);
        let results = retriever.retrieve("anything", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_lexical_query_override_feeds_lexical_only() {
        let retriever = retriever(seeded_index());

        // The override names the platform; the top result must follow it.
        let results = retriever
            .retrieve("what is that thing you use", 1, Some("outsystems platform"))
            .await
            .unwrap();
        assert_eq!(results[0].chunk_id, "c2");
    }

    #[tokio::test]
    async fn test_dense_only_populates_fused_score() {
        let retriever = retriever(seeded_index());
        let results = retriever.retrieve_dense("anything", 3).await.unwrap();

        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(result.dense_score.is_some());
            assert!((result.fused_score - result.dense_score.unwrap()).abs() < 1e-12);
            assert!(result.lexical_score.is_none());
        }
        // Ordered by ascending distance from the fixed query vector.
        assert_eq!(results[0].chunk_id, "c1");
    }
}
