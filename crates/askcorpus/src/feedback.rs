//! Feedback ledger: learns from thumbs up/down signals.
//!
//! Four mechanisms, all persisted in SQLite:
//!
//! 1. **Chunk adjustments** — accumulating per-chunk score deltas
//!    (+0.1 per positive, -0.15 per negative; penalties bite harder than
//!    boosts so one bad signal outweighs one good one).
//! 2. **Query flagging** — a query that keeps getting negative feedback is
//!    promoted from `monitoring` to `pending` review once it crosses the
//!    configured threshold.
//! 3. **Query mappings** — positive feedback records which chunks answered
//!    a query well; later queries sharing significant words boost those
//!    chunks.
//! 4. **Cache invalidation** — negative feedback deletes any cached
//!    response for the query, in any settings variant.
//!
//! All ledger mutations are single upsert statements (or short
//! transactions), so concurrent feedback on the same chunk or query never
//! loses an increment.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::cache::ResponseCache;
use askcorpus_core::models::RetrievalResult;

const POSITIVE_ADJUSTMENT: f64 = 0.1;
const NEGATIVE_ADJUSTMENT: f64 = -0.15;
const LEARNED_BOOST_PER_POSITIVE: f64 = 0.05;

/// Summary of the automatic actions taken for one feedback signal.
#[derive(Debug, Default, Serialize)]
pub struct FeedbackActions {
    pub cache_invalidated: bool,
    pub chunks_adjusted: Vec<String>,
    pub query_flagged: bool,
    pub flag_reason: Option<String>,
    pub query_learned: bool,
}

/// A query under review, as stored in the ledger.
#[derive(Debug, Serialize)]
pub struct FlaggedQuery {
    pub query: String,
    pub negative_count: i64,
    pub flag_reason: Option<String>,
    pub status: String,
    pub created_at: i64,
}

/// Ledger-wide counters for the stats surface.
#[derive(Debug, Serialize)]
pub struct LearningStats {
    pub chunks_adjusted: i64,
    pub chunks_boosted: i64,
    pub chunks_penalized: i64,
    pub flags_by_status: HashMap<String, i64>,
    pub mapped_queries: i64,
    pub positive_signals: i64,
}

pub struct FeedbackLearner {
    pool: SqlitePool,
    flag_threshold: i64,
}

fn hash_query(query: &str) -> String {
    let normalized = query.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)[..32].to_string()
}

impl FeedbackLearner {
    pub fn new(pool: SqlitePool, flag_threshold: i64) -> Self {
        Self {
            pool,
            flag_threshold,
        }
    }

    // ============ Chunk adjustments ============

    /// Record one feedback signal against a chunk.
    pub async fn adjust_chunk_score(&self, chunk_id: &str, is_positive: bool) -> Result<()> {
        let delta = if is_positive {
            POSITIVE_ADJUSTMENT
        } else {
            NEGATIVE_ADJUSTMENT
        };
        let (pos, neg) = if is_positive { (1, 0) } else { (0, 1) };

        sqlx::query(
            r#"
            INSERT INTO chunk_adjustments
            (chunk_id, score_adjustment, positive_count, negative_count, last_updated)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                score_adjustment = score_adjustment + excluded.score_adjustment,
                positive_count = positive_count + excluded.positive_count,
                negative_count = negative_count + excluded.negative_count,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(chunk_id)
        .bind(delta)
        .bind(pos)
        .bind(neg)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Accumulated adjustment for one chunk, `0.0` if none recorded.
    pub async fn get_chunk_adjustment(&self, chunk_id: &str) -> Result<f64> {
        let row: Option<f64> = sqlx::query_scalar(
            "SELECT score_adjustment FROM chunk_adjustments WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or(0.0))
    }

    pub async fn get_all_chunk_adjustments(&self) -> Result<HashMap<String, f64>> {
        let rows = sqlx::query("SELECT chunk_id, score_adjustment FROM chunk_adjustments")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("chunk_id"), row.get("score_adjustment")))
            .collect())
    }

    /// Apply accumulated adjustments to retrieval results and re-sort.
    ///
    /// The adjusted score is `clamp(0, 1, fused + delta)`. Every result
    /// gets an adjusted score, even when no delta exists, so downstream
    /// consumers never have to fall back to the fused score.
    pub async fn apply_adjustments(&self, results: &mut Vec<RetrievalResult>) -> Result<()> {
        let adjustments = self.get_all_chunk_adjustments().await?;

        for result in results.iter_mut() {
            let delta = adjustments.get(&result.chunk_id).copied().unwrap_or(0.0);
            result.adjusted_score = Some((result.fused_score + delta).clamp(0.0, 1.0));
            result.had_adjustment = delta != 0.0;
        }

        results.sort_by(|a, b| {
            b.adjusted_score
                .partial_cmp(&a.adjusted_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(())
    }

    // ============ Query flagging ============

    /// Count one negative signal against a query; flag it for review the
    /// first time the count crosses the threshold.
    ///
    /// The returned reason is `Some` exactly once per query: at the
    /// `monitoring` to `pending` transition. Resolved or repeatedly
    /// reported queries keep counting without re-notifying.
    pub async fn flag_query_if_needed(&self, query: &str) -> Result<Option<String>> {
        let query_hash = hash_query(query);
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO flagged_queries (query, query_hash, negative_count, status, created_at)
            VALUES (?, ?, 1, 'monitoring', ?)
            ON CONFLICT(query_hash) DO UPDATE SET
                negative_count = negative_count + 1
            RETURNING negative_count, status
            "#,
        )
        .bind(query)
        .bind(&query_hash)
        .bind(Utc::now().timestamp())
        .fetch_one(&mut *tx)
        .await?;

        let negative_count: i64 = row.get("negative_count");
        let status: String = row.get("status");

        let reason = if negative_count >= self.flag_threshold && status == "monitoring" {
            let reason = format!("Query has {} negative feedbacks", negative_count);
            sqlx::query(
                "UPDATE flagged_queries SET status = 'pending', flag_reason = ? WHERE query_hash = ?",
            )
            .bind(&reason)
            .bind(&query_hash)
            .execute(&mut *tx)
            .await?;
            Some(reason)
        } else {
            None
        };

        tx.commit().await?;
        Ok(reason)
    }

    pub async fn get_flagged_queries(&self, status: &str) -> Result<Vec<FlaggedQuery>> {
        let rows = sqlx::query(
            r#"
            SELECT query, negative_count, flag_reason, status, created_at
            FROM flagged_queries
            WHERE status = ?
            ORDER BY negative_count DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| FlaggedQuery {
                query: row.get("query"),
                negative_count: row.get("negative_count"),
                flag_reason: row.get("flag_reason"),
                status: row.get("status"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Mark a flagged query as handled. `resolution` is typically
    /// `resolved` or `dismissed`.
    pub async fn resolve_flag(&self, query: &str, resolution: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE flagged_queries SET status = ?, resolved_at = ? WHERE query_hash = ?",
        )
        .bind(resolution)
        .bind(Utc::now().timestamp())
        .bind(hash_query(query))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============ Query mappings ============

    /// Record that these chunks answered the query well.
    pub async fn learn_successful_query(&self, query: &str, chunk_ids: &[String]) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO query_mappings
            (original_query, query_hash, successful_chunks, positive_count, created_at, last_used)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(query_hash) DO UPDATE SET
                positive_count = positive_count + 1,
                successful_chunks = excluded.successful_chunks,
                last_used = excluded.last_used
            "#,
        )
        .bind(query)
        .bind(hash_query(query))
        .bind(serde_json::to_string(chunk_ids)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Chunk boosts derived from previously successful similar queries.
    ///
    /// Similarity is crude on purpose: any stored query sharing a word
    /// longer than three characters counts, and each match contributes
    /// `0.05 × positive_count` per chunk it recorded.
    pub async fn get_learned_boosts(&self, query: &str) -> Result<HashMap<String, f64>> {
        let mut matched: Vec<(String, String, i64)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for word in query.to_lowercase().split_whitespace() {
            if word.len() <= 3 {
                continue;
            }
            let rows = sqlx::query(
                r#"
                SELECT original_query, successful_chunks, positive_count
                FROM query_mappings
                WHERE LOWER(original_query) LIKE ?
                ORDER BY positive_count DESC
                LIMIT 5
                "#,
            )
            .bind(format!("%{}%", word))
            .fetch_all(&self.pool)
            .await?;

            for row in &rows {
                let original: String = row.get("original_query");
                if seen.insert(original.clone()) {
                    matched.push((original, row.get("successful_chunks"), row.get("positive_count")));
                }
            }
        }

        let mut boosts: HashMap<String, f64> = HashMap::new();
        for (_, chunks_json, positive_count) in matched {
            let chunk_ids: Vec<String> = serde_json::from_str(&chunks_json).unwrap_or_default();
            let boost = LEARNED_BOOST_PER_POSITIVE * positive_count as f64;
            for chunk_id in chunk_ids {
                *boosts.entry(chunk_id).or_insert(0.0) += boost;
            }
        }

        Ok(boosts)
    }

    /// Add learned boosts onto already-adjusted scores and re-sort.
    pub fn apply_learned_boosts(
        results: &mut Vec<RetrievalResult>,
        boosts: &HashMap<String, f64>,
    ) {
        if boosts.is_empty() {
            return;
        }

        for result in results.iter_mut() {
            if let Some(boost) = boosts.get(&result.chunk_id) {
                let base = result.adjusted_score.unwrap_or(result.fused_score);
                result.adjusted_score = Some((base + boost).clamp(0.0, 1.0));
            }
        }

        results.sort_by(|a, b| {
            b.adjusted_score
                .partial_cmp(&a.adjusted_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    // ============ Combined processing ============

    /// Apply every automatic action for one feedback signal and report
    /// what was done.
    pub async fn process_feedback(
        &self,
        query: &str,
        is_positive: bool,
        chunk_ids: &[String],
        cache: Option<&ResponseCache>,
    ) -> Result<FeedbackActions> {
        let mut actions = FeedbackActions::default();

        if is_positive {
            for chunk_id in chunk_ids {
                self.adjust_chunk_score(chunk_id, true).await?;
                actions.chunks_adjusted.push(chunk_id.clone());
            }
            self.learn_successful_query(query, chunk_ids).await?;
            actions.query_learned = true;
        } else {
            if let Some(cache) = cache {
                actions.cache_invalidated = cache.invalidate_query(query).await?;
            }
            for chunk_id in chunk_ids {
                self.adjust_chunk_score(chunk_id, false).await?;
                actions.chunks_adjusted.push(chunk_id.clone());
            }
            if let Some(reason) = self.flag_query_if_needed(query).await? {
                info!(query, reason = %reason, "query flagged for review");
                actions.query_flagged = true;
                actions.flag_reason = Some(reason);
            }
        }

        Ok(actions)
    }

    // ============ Statistics ============

    pub async fn get_stats(&self) -> Result<LearningStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN score_adjustment > 0 THEN 1 ELSE 0 END), 0) AS boosted,
                COALESCE(SUM(CASE WHEN score_adjustment < 0 THEN 1 ELSE 0 END), 0) AS penalized
            FROM chunk_adjustments
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let flag_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM flagged_queries GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let flags_by_status = flag_rows
            .iter()
            .map(|r| (r.get("status"), r.get("n")))
            .collect();

        let mapping_row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(positive_count), 0) AS signals FROM query_mappings",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LearningStats {
            chunks_adjusted: row.get("total"),
            chunks_boosted: row.get("boosted"),
            chunks_penalized: row.get("penalized"),
            flags_by_status,
            mapped_queries: mapping_row.get("total"),
            positive_signals: mapping_row.get("signals"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_query_normalizes_case_and_whitespace() {
        assert_eq!(hash_query("  What is Salesforce? "), hash_query("what is salesforce?"));
        assert_eq!(hash_query("abc").len(), 32);
    }

    #[test]
    fn test_hash_query_distinct_queries() {
        assert_ne!(hash_query("pricing"), hash_query("careers"));
    }
}
