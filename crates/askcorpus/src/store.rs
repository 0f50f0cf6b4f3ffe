//! SQLite-backed corpus and vector storage.
//!
//! Chunks and their embeddings live in two tables keyed by the
//! deterministic chunk id. Vector search is a brute-force L2 scan over the
//! stored BLOBs, which is fine at corpus sizes where SQLite is the right
//! storage in the first place.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use askcorpus_core::embedding::{blob_to_vec, l2_distance, vec_to_blob};
use askcorpus_core::models::{Chunk, ChunkMetadata};
use askcorpus_core::traits::{CorpusStore, VectorHit, VectorIndex};

#[derive(Clone)]
pub struct SqliteCorpus {
    pool: SqlitePool,
}

impl SqliteCorpus {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace every chunk of a source page in one transaction.
    ///
    /// Re-ingesting a page never leaves a mix of old and new chunks: the
    /// old rows (and their vectors) are deleted, then the new set is
    /// inserted.
    pub async fn replace_page(&self, source_url: &str, chunks: &[(Chunk, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE source_url = ?)",
        )
        .bind(source_url)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE source_url = ?")
            .bind(source_url)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now().timestamp();

        for (chunk, embedding) in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                (id, source_url, title, author, published, categories_json, position, text, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.source_url)
            .bind(&chunk.metadata.title)
            .bind(&chunk.metadata.author)
            .bind(&chunk.metadata.published)
            .bind(serde_json::to_string(&chunk.metadata.categories)?)
            .bind(chunk.metadata.position)
            .bind(&chunk.text)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding, dims) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(vec_to_blob(embedding))
                .bind(embedding.len() as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Total number of chunks in the corpus.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let categories_json: String = row.get("categories_json");
    Ok(Chunk {
        id: row.get("id"),
        text: row.get("text"),
        metadata: ChunkMetadata {
            source_url: row.get("source_url"),
            title: row.get("title"),
            author: row.get("author"),
            published: row.get("published"),
            categories: serde_json::from_str(&categories_json).unwrap_or_default(),
            position: row.get("position"),
        },
    })
}

#[async_trait]
impl CorpusStore for SqliteCorpus {
    async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, source_url, title, author, published, categories_json, position, text
             FROM chunks ORDER BY source_url, position",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteCorpus {
    async fn search(&self, query_vec: &[f32], top_n: usize) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_url, c.title, c.author, c.published,
                   c.categories_json, c.position, c.text, v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<VectorHit> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            hits.push(VectorHit {
                chunk: row_to_chunk(row)?,
                distance: l2_distance(query_vec, &blob_to_vec(&blob)),
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_n);
        Ok(hits)
    }
}
