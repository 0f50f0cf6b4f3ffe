//! Corpus ingestion from a JSON page export.
//!
//! Input is a JSON array of page records (url, title, author, text).
//! Each page is split into overlapping word windows, embedded, and written
//! to the store as an atomic page replacement.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::config::ChunkingConfig;
use crate::store::SqliteCorpus;
use askcorpus_core::models::{chunk_id, Chunk, ChunkMetadata};
use askcorpus_core::traits::Embedder;

#[derive(Debug, Deserialize)]
pub struct PageRecord {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub text: String,
}

/// Split text into word windows of `chunk_words`, each overlapping the
/// previous by `overlap_words`.
///
/// An overlap at or above the window size would not advance; the step is
/// clamped to at least one word so the split always terminates.
pub fn chunk_text(text: &str, chunk_words: usize, overlap_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let window = chunk_words.max(1);
    let step = window.saturating_sub(overlap_words).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + window).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

pub fn load_pages(path: &Path) -> Result<Vec<PageRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pages file: {}", path.display()))?;
    let pages: Vec<PageRecord> =
        serde_json::from_str(&content).with_context(|| "Failed to parse pages JSON")?;
    Ok(pages)
}

/// Chunk, embed, and store every page. Returns (pages, chunks) written.
pub async fn ingest_pages(
    store: &SqliteCorpus,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
    pages: &[PageRecord],
) -> Result<(usize, usize)> {
    let mut total_chunks = 0;

    for page in pages {
        let texts = chunk_text(&page.text, chunking.chunk_words, chunking.overlap_words);

        let mut chunks: Vec<(Chunk, Vec<f32>)> = Vec::with_capacity(texts.len());
        for (position, text) in texts.into_iter().enumerate() {
            let embedding = embedder.embed(&text).await?;
            chunks.push((
                Chunk {
                    id: chunk_id(&page.url, position as i64),
                    text,
                    metadata: ChunkMetadata {
                        source_url: page.url.clone(),
                        title: page.title.clone(),
                        author: page.author.clone(),
                        published: page.published.clone(),
                        categories: page.categories.clone(),
                        position: position as i64,
                    },
                },
                embedding,
            ));
        }

        store.replace_page(&page.url, &chunks).await?;
        total_chunks += chunks.len();
        info!(url = %page.url, chunks = chunks.len(), "page ingested");
    }

    Ok((pages.len(), total_chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_respects_window_and_overlap() {
        let words: Vec<String> = (0..10).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");

        let chunks = chunk_text(&text, 4, 1);
        // Windows start at 0, 3, 6, 9.
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], "w0 w1 w2 w3");
        assert_eq!(chunks[1], "w3 w4 w5 w6");
        assert_eq!(chunks[3], "w9");
    }

    #[test]
    fn test_chunk_text_short_input_is_single_chunk() {
        let chunks = chunk_text("just three words", 300, 50);
        assert_eq!(chunks, vec!["just three words"]);
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("   ", 10, 2).is_empty());
    }

    #[test]
    fn test_chunk_text_overlap_at_window_size_still_terminates() {
        let chunks = chunk_text("a b c d e", 2, 2);
        // Step clamps to one word; the split ends once a window reaches
        // the final word.
        assert_eq!(chunks, vec!["a b", "b c", "c d", "d e"]);
    }

    #[test]
    fn test_chunk_text_zero_window_clamps_to_one_word() {
        assert_eq!(chunk_text("a b c", 0, 0), vec!["a", "b", "c"]);
    }
}
