//! TTL'd response cache keyed on query plus answer-shaping settings.
//!
//! The cache key covers the normalized query and only the settings that
//! change what answer is produced (`top_k`, `use_expansion`, `use_hybrid`,
//! `use_hyde`). Temperature is deliberately excluded from the key: two
//! runs at different temperatures are close enough to share a cached
//! answer. The stored `settings_hash` column audits the full settings,
//! temperature included, so it can differ between rows that share a key.
//!
//! Expiry is lazy. Expired rows are deleted when a lookup touches them,
//! with `clear_expired` available for bulk cleanup.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

/// The request settings as seen by the cache. Everything except
/// `temperature` participates in the lookup key; the audit hash covers
/// all fields.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub top_k: usize,
    pub use_expansion: bool,
    pub use_hybrid: bool,
    pub use_hyde: bool,
    pub temperature: f32,
}

/// A cache hit: the stored answer and its sources.
#[derive(Debug, Serialize)]
pub struct CachedResponse {
    pub answer: String,
    pub sources: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub total_entries: i64,
    pub total_hits: i64,
    pub avg_hits_per_entry: f64,
}

#[derive(Debug, Serialize)]
pub struct RecentCacheEntry {
    pub query: String,
    pub hit_count: i64,
    pub created_at: i64,
}

pub struct ResponseCache {
    pool: SqlitePool,
    ttl_seconds: i64,
}

fn cache_key(query: &str, settings: &CacheSettings) -> String {
    let normalized = query.trim().to_lowercase();
    // serde_json maps have sorted keys, so this serialization is canonical.
    let settings_json = serde_json::json!({
        "top_k": settings.top_k,
        "use_expansion": settings.use_expansion,
        "use_hybrid": settings.use_hybrid,
        "use_hyde": settings.use_hyde,
    });
    let combined = format!("{}|{}", normalized, settings_json);
    let digest = Sha256::digest(combined.as_bytes());
    hex::encode(digest)[..32].to_string()
}

fn settings_hash(settings: &CacheSettings) -> String {
    let settings_json = serde_json::json!({
        "temperature": settings.temperature,
        "top_k": settings.top_k,
        "use_expansion": settings.use_expansion,
        "use_hybrid": settings.use_hybrid,
        "use_hyde": settings.use_hyde,
    });
    let digest = Sha256::digest(settings_json.to_string().as_bytes());
    hex::encode(digest)[..16].to_string()
}

impl ResponseCache {
    pub fn new(pool: SqlitePool, ttl_hours: i64) -> Self {
        Self {
            pool,
            ttl_seconds: ttl_hours * 3600,
        }
    }

    /// Look up a cached response. A hit bumps the hit counter; an expired
    /// row is deleted and reported as a miss.
    pub async fn get(
        &self,
        query: &str,
        settings: &CacheSettings,
    ) -> Result<Option<CachedResponse>> {
        let key = cache_key(query, settings);

        let row = sqlx::query(
            "SELECT id, response, sources, created_at FROM response_cache WHERE query_hash = ?",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get("id");
        let created_at: i64 = row.get("created_at");

        if Utc::now().timestamp() - created_at >= self.ttl_seconds {
            sqlx::query("DELETE FROM response_cache WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        sqlx::query("UPDATE response_cache SET hit_count = hit_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let sources_json: Option<String> = row.get("sources");
        let sources = sources_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

        Ok(Some(CachedResponse {
            answer: row.get("response"),
            sources,
        }))
    }

    /// Store a response, replacing any previous entry for the same key.
    /// The hit counter restarts at 1 on replace.
    pub async fn set(
        &self,
        query: &str,
        settings: &CacheSettings,
        response: &str,
        sources: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO response_cache
            (query_hash, query, settings_hash, response, sources, created_at, hit_count)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(cache_key(query, settings))
        .bind(query)
        .bind(settings_hash(settings))
        .bind(response)
        .bind(sources.to_string())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete every cached entry for a query, regardless of which settings
    /// produced it. Returns whether anything was deleted.
    pub async fn invalidate_query(&self, query: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM response_cache WHERE LOWER(TRIM(query)) = ?")
            .bind(query.trim().to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_expired(&self) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - self.ttl_seconds;
        let result = sqlx::query("DELETE FROM response_cache WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_entries,
                COALESCE(SUM(hit_count), 0) AS total_hits,
                COALESCE(AVG(hit_count), 0.0) AS avg_hits
            FROM response_cache
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            total_entries: row.get("total_entries"),
            total_hits: row.get("total_hits"),
            avg_hits_per_entry: row.get("avg_hits"),
        })
    }

    pub async fn get_recent(&self, limit: i64) -> Result<Vec<RecentCacheEntry>> {
        let rows = sqlx::query(
            "SELECT query, hit_count, created_at FROM response_cache
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RecentCacheEntry {
                query: row.get("query"),
                hit_count: row.get("hit_count"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
