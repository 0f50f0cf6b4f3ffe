//! Query analytics log.
//!
//! One row per answered question: the query, its expansion if any, the
//! retrieval scores, timing, and the eventual feedback verdict. Used to
//! find knowledge gaps (low-score queries) and to measure feedback rates.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Serialize)]
pub struct QueryLogEntry {
    pub id: i64,
    pub timestamp: i64,
    pub query: String,
    pub expanded_query: Option<String>,
    pub retrieval_scores: Vec<f64>,
    pub avg_retrieval_score: f64,
    pub num_chunks_retrieved: i64,
    pub response_time_ms: i64,
    pub feedback: Option<String>,
    pub model_used: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsStats {
    pub total_queries: i64,
    pub avg_retrieval_score: f64,
    pub avg_response_time_ms: f64,
    pub positive_feedback: i64,
    pub negative_feedback: i64,
}

pub struct QueryLogger {
    pool: SqlitePool,
}

impl QueryLogger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one answered query. Returns the log row id so feedback can
    /// be attached later.
    pub async fn log(
        &self,
        query: &str,
        retrieval_scores: &[f64],
        response_time_ms: i64,
        expanded_query: Option<&str>,
        model_used: &str,
    ) -> Result<i64> {
        let avg = if retrieval_scores.is_empty() {
            0.0
        } else {
            retrieval_scores.iter().sum::<f64>() / retrieval_scores.len() as f64
        };

        let row = sqlx::query(
            r#"
            INSERT INTO query_logs
            (timestamp, query, expanded_query, retrieval_scores, avg_retrieval_score,
             num_chunks_retrieved, response_time_ms, feedback, model_used)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            RETURNING id
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(query)
        .bind(expanded_query)
        .bind(serde_json::to_string(retrieval_scores)?)
        .bind(avg)
        .bind(retrieval_scores.len() as i64)
        .bind(response_time_ms)
        .bind(model_used)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    /// Attach a feedback verdict (`positive` or `negative`) to a log row.
    pub async fn update_feedback(&self, log_id: i64, feedback: &str) -> Result<()> {
        sqlx::query("UPDATE query_logs SET feedback = ? WHERE id = ?")
            .bind(feedback)
            .bind(log_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_recent(&self, limit: i64) -> Result<Vec<QueryLogEntry>> {
        let rows = sqlx::query("SELECT * FROM query_logs ORDER BY timestamp DESC, id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Queries whose retrieval scored below `threshold` are likely
    /// knowledge gaps in the corpus.
    pub async fn get_low_score_queries(
        &self,
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<QueryLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM query_logs WHERE avg_retrieval_score < ?
             ORDER BY avg_retrieval_score ASC LIMIT ?",
        )
        .bind(threshold)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Most frequently asked queries, case-insensitive, most common first.
    pub async fn get_common_queries(&self, limit: i64) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT LOWER(query) AS q, COUNT(*) AS n FROM query_logs
             GROUP BY LOWER(query) ORDER BY n DESC, q ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| (row.get("q"), row.get("n"))).collect())
    }

    pub async fn get_stats(&self) -> Result<AnalyticsStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(AVG(avg_retrieval_score), 0.0) AS avg_score,
                COALESCE(AVG(response_time_ms), 0.0) AS avg_time,
                COALESCE(SUM(CASE WHEN feedback = 'positive' THEN 1 ELSE 0 END), 0) AS positive,
                COALESCE(SUM(CASE WHEN feedback = 'negative' THEN 1 ELSE 0 END), 0) AS negative
            FROM query_logs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(AnalyticsStats {
            total_queries: row.get("total"),
            avg_retrieval_score: row.get("avg_score"),
            avg_response_time_ms: row.get("avg_time"),
            positive_feedback: row.get("positive"),
            negative_feedback: row.get("negative"),
        })
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<QueryLogEntry> {
    let scores_json: Option<String> = row.get("retrieval_scores");
    Ok(QueryLogEntry {
        id: row.get("id"),
        timestamp: row.get("timestamp"),
        query: row.get("query"),
        expanded_query: row.get("expanded_query"),
        retrieval_scores: scores_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        avg_retrieval_score: row.try_get("avg_retrieval_score").unwrap_or(0.0),
        num_chunks_retrieved: row.try_get("num_chunks_retrieved").unwrap_or(0),
        response_time_ms: row.try_get("response_time_ms").unwrap_or(0),
        feedback: row.get("feedback"),
        model_used: row.get("model_used"),
    })
}
