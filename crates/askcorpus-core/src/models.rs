//! Core data models shared between the retrieval pipeline and the
//! application layer.

use serde::{Deserialize, Serialize};

/// Source metadata attached to every chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// URL of the page the chunk was extracted from.
    pub source_url: String,
    pub title: String,
    pub author: String,
    /// Publish date as provided by the source, if any.
    pub published: Option<String>,
    pub categories: Vec<String>,
    /// Zero-based position of the chunk within its source page.
    pub position: i64,
}

/// A contiguous span of source text, immutable once created.
///
/// Chunks are replaced wholesale when their source page is re-ingested;
/// nothing mutates a chunk in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from the source URL and position,
    /// see [`chunk_id`].
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Derive the deterministic chunk id from a source URL and position index.
///
/// `/` and `:` are replaced so the id stays a single flat token.
pub fn chunk_id(source_url: &str, position: i64) -> String {
    format!("{}_{}", source_url, position)
        .replace('/', "_")
        .replace(':', "_")
}

/// A single ranked result produced per query, never persisted.
///
/// All scoring dimensions live on this one struct as optional fields,
/// populated uniformly regardless of which index contributed the chunk.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Dense similarity `1 / (1 + distance)`, if the dense index returned
    /// this chunk.
    pub dense_score: Option<f64>,
    /// Raw BM25 score, if the lexical index returned this chunk.
    pub lexical_score: Option<f64>,
    /// Reciprocal-rank-fusion score (or the dense similarity when the
    /// dense-only path was used).
    pub fused_score: f64,
    /// 1-indexed rank within the dense candidate list.
    pub dense_rank: Option<usize>,
    /// 1-indexed rank within the lexical candidate list.
    pub lexical_rank: Option<usize>,
    /// Score after feedback adjustments, set by the adjustment applier.
    pub adjusted_score: Option<f64>,
    /// Whether a nonzero feedback adjustment was applied.
    pub had_adjustment: bool,
}

impl RetrievalResult {
    /// Start an unscored result from a chunk.
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            dense_score: None,
            lexical_score: None,
            fused_score: 0.0,
            dense_rank: None,
            lexical_rank: None,
            adjusted_score: None,
            had_adjustment: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = chunk_id("https://example.com/blog/post", 3);
        let b = chunk_id("https://example.com/blog/post", 3);
        assert_eq!(a, b);
        assert_eq!(a, "https___example.com_blog_post_3");
    }

    #[test]
    fn test_chunk_id_distinct_positions() {
        assert_ne!(
            chunk_id("https://example.com/p", 0),
            chunk_id("https://example.com/p", 1)
        );
    }
}
