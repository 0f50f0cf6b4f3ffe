//! Integration tests for the feedback ledger, response cache, and query
//! log against a real SQLite database.

use sqlx::SqlitePool;
use tempfile::TempDir;

use askcorpus::cache::{CacheSettings, ResponseCache};
use askcorpus::feedback::FeedbackLearner;
use askcorpus::{analytics::QueryLogger, db, migrate};
use askcorpus_core::models::{Chunk, ChunkMetadata, RetrievalResult};

async fn setup() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = db::connect(&dir.path().join("test.db")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

fn settings() -> CacheSettings {
    CacheSettings {
        top_k: 5,
        use_expansion: true,
        use_hybrid: true,
        use_hyde: false,
        temperature: 0.7,
    }
}

fn result(chunk_id: &str, fused_score: f64) -> RetrievalResult {
    let mut r = RetrievalResult::from_chunk(&Chunk {
        id: chunk_id.to_string(),
        text: format!("text of {chunk_id}"),
        metadata: ChunkMetadata::default(),
    });
    r.fused_score = fused_score;
    r
}

// ============ Chunk adjustments ============

#[tokio::test]
async fn test_adjustments_accumulate_asymmetrically() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    learner.adjust_chunk_score("c1", true).await.unwrap();
    learner.adjust_chunk_score("c1", true).await.unwrap();
    learner.adjust_chunk_score("c1", false).await.unwrap();

    // Two boosts and one penalty: 0.1 + 0.1 - 0.15.
    let delta = learner.get_chunk_adjustment("c1").await.unwrap();
    assert!((delta - 0.05).abs() < 1e-9);

    // One negative outweighs one positive.
    learner.adjust_chunk_score("c2", true).await.unwrap();
    learner.adjust_chunk_score("c2", false).await.unwrap();
    assert!(learner.get_chunk_adjustment("c2").await.unwrap() < 0.0);
}

#[tokio::test]
async fn test_unknown_chunk_has_zero_adjustment() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);
    assert_eq!(learner.get_chunk_adjustment("missing").await.unwrap(), 0.0);
}

#[tokio::test]
async fn test_apply_adjustments_clamps_and_resorts() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    // Drive c1 far negative and c2 far positive.
    for _ in 0..10 {
        learner.adjust_chunk_score("c1", false).await.unwrap();
        learner.adjust_chunk_score("c2", true).await.unwrap();
    }

    let mut results = vec![result("c1", 0.9), result("c2", 0.1), result("c3", 0.5)];
    learner.apply_adjustments(&mut results).await.unwrap();

    // c1: 0.9 - 1.5 clamps to 0, c2: 0.1 + 1.0 clamps to 1.
    assert_eq!(results[0].chunk_id, "c2");
    assert_eq!(results[0].adjusted_score, Some(1.0));
    assert!(results[0].had_adjustment);

    assert_eq!(results[2].chunk_id, "c1");
    assert_eq!(results[2].adjusted_score, Some(0.0));

    // Untouched chunk keeps its fused score but still gets the field.
    let c3 = &results[1];
    assert_eq!(c3.chunk_id, "c3");
    assert_eq!(c3.adjusted_score, Some(0.5));
    assert!(!c3.had_adjustment);
}

// ============ Query flagging ============

#[tokio::test]
async fn test_flagging_notifies_once_at_threshold() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    // First negative: monitored, not flagged.
    assert!(learner
        .flag_query_if_needed("broken query")
        .await
        .unwrap()
        .is_none());

    // Second negative crosses the threshold.
    let reason = learner.flag_query_if_needed("broken query").await.unwrap();
    assert_eq!(reason.as_deref(), Some("Query has 2 negative feedbacks"));

    // Third negative keeps counting but does not re-notify.
    assert!(learner
        .flag_query_if_needed("broken query")
        .await
        .unwrap()
        .is_none());

    let flags = learner.get_flagged_queries("pending").await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].negative_count, 3);
    assert_eq!(
        flags[0].flag_reason.as_deref(),
        Some("Query has 2 negative feedbacks")
    );
}

#[tokio::test]
async fn test_flag_threshold_one_flags_immediately() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 1);

    let reason = learner.flag_query_if_needed("bad").await.unwrap();
    assert_eq!(reason.as_deref(), Some("Query has 1 negative feedbacks"));
}

#[tokio::test]
async fn test_resolved_flag_does_not_renotify() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    learner.flag_query_if_needed("q").await.unwrap();
    learner.flag_query_if_needed("q").await.unwrap();
    assert!(learner.resolve_flag("q", "resolved").await.unwrap());

    // Further negatives count but the resolved flag stays resolved.
    assert!(learner.flag_query_if_needed("q").await.unwrap().is_none());
    assert!(learner.get_flagged_queries("pending").await.unwrap().is_empty());

    let resolved = learner.get_flagged_queries("resolved").await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].negative_count, 3);
}

#[tokio::test]
async fn test_flag_hash_ignores_case_and_whitespace() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    learner.flag_query_if_needed("What Is Pricing?").await.unwrap();
    let reason = learner
        .flag_query_if_needed("  what is pricing? ")
        .await
        .unwrap();
    assert!(reason.is_some());
}

#[tokio::test]
async fn test_resolve_missing_flag_returns_false() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);
    assert!(!learner.resolve_flag("never seen", "resolved").await.unwrap());
}

// ============ Query mappings ============

#[tokio::test]
async fn test_learned_boosts_scale_with_positive_count() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    let chunks = vec!["c1".to_string(), "c2".to_string()];
    learner
        .learn_successful_query("salesforce pricing details", &chunks)
        .await
        .unwrap();
    learner
        .learn_successful_query("salesforce pricing details", &chunks)
        .await
        .unwrap();

    // Shares the word "salesforce" with the stored query.
    let boosts = learner.get_learned_boosts("salesforce support").await.unwrap();
    assert!((boosts["c1"] - 0.1).abs() < 1e-9);
    assert!((boosts["c2"] - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_learned_boosts_ignore_short_words() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    learner
        .learn_successful_query("how is the sky", &["c1".to_string()])
        .await
        .unwrap();

    // Every word in the probe is three characters or fewer, so none
    // qualifies for matching.
    assert!(learner.get_learned_boosts("is it the sky").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unrelated_query_gets_no_boosts() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    learner
        .learn_successful_query("salesforce consulting", &["c1".to_string()])
        .await
        .unwrap();

    assert!(learner
        .get_learned_boosts("kubernetes deployment")
        .await
        .unwrap()
        .is_empty());
}

// ============ Combined feedback processing ============

#[tokio::test]
async fn test_negative_feedback_invalidates_cache() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool.clone(), 2);
    let cache = ResponseCache::new(pool, 24);

    let s = settings();
    cache
        .set("what is pricing", &s, "answer", &serde_json::json!([]))
        .await
        .unwrap();
    assert!(cache.get("what is pricing", &s).await.unwrap().is_some());

    let actions = learner
        .process_feedback("What Is Pricing", false, &["c1".to_string()], Some(&cache))
        .await
        .unwrap();

    assert!(actions.cache_invalidated);
    assert_eq!(actions.chunks_adjusted, vec!["c1".to_string()]);
    assert!(!actions.query_learned);
    assert!(cache.get("what is pricing", &s).await.unwrap().is_none());
}

#[tokio::test]
async fn test_positive_feedback_learns_and_skips_cache() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool.clone(), 2);
    let cache = ResponseCache::new(pool, 24);

    let s = settings();
    cache
        .set("good query", &s, "answer", &serde_json::json!([]))
        .await
        .unwrap();

    let actions = learner
        .process_feedback("good query", true, &["c1".to_string()], Some(&cache))
        .await
        .unwrap();

    assert!(!actions.cache_invalidated);
    assert!(actions.query_learned);
    assert!(!actions.query_flagged);
    // Positive feedback never evicts.
    assert!(cache.get("good query", &s).await.unwrap().is_some());

    let boosts = learner.get_learned_boosts("good question").await.unwrap();
    assert!(boosts.contains_key("c1"));
}

#[tokio::test]
async fn test_stats_reflect_ledger_contents() {
    let (_dir, pool) = setup().await;
    let learner = FeedbackLearner::new(pool, 2);

    learner.adjust_chunk_score("up", true).await.unwrap();
    learner.adjust_chunk_score("down", false).await.unwrap();
    learner.flag_query_if_needed("meh").await.unwrap();
    learner
        .learn_successful_query("good", &["up".to_string()])
        .await
        .unwrap();

    let stats = learner.get_stats().await.unwrap();
    assert_eq!(stats.chunks_adjusted, 2);
    assert_eq!(stats.chunks_boosted, 1);
    assert_eq!(stats.chunks_penalized, 1);
    assert_eq!(stats.flags_by_status.get("monitoring"), Some(&1));
    assert_eq!(stats.mapped_queries, 1);
    assert_eq!(stats.positive_signals, 1);
}

// ============ Response cache ============

#[tokio::test]
async fn test_cache_roundtrip_and_hit_count() {
    let (_dir, pool) = setup().await;
    let cache = ResponseCache::new(pool, 24);
    let s = settings();

    cache
        .set("query", &s, "the answer", &serde_json::json!([{"url": "u"}]))
        .await
        .unwrap();

    let hit = cache.get("query", &s).await.unwrap().unwrap();
    assert_eq!(hit.answer, "the answer");
    cache.get("query", &s).await.unwrap();

    // Two hits on top of the initial count of 1.
    let recent = cache.get_recent(10).await.unwrap();
    assert_eq!(recent[0].hit_count, 3);

    // Replacing the entry restarts the counter.
    cache
        .set("query", &s, "new answer", &serde_json::json!([]))
        .await
        .unwrap();
    let recent = cache.get_recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].hit_count, 1);
}

#[tokio::test]
async fn test_cache_miss_on_different_settings() {
    let (_dir, pool) = setup().await;
    let cache = ResponseCache::new(pool, 24);

    cache
        .set("query", &settings(), "answer", &serde_json::json!([]))
        .await
        .unwrap();

    let mut other = settings();
    other.top_k = 3;
    assert!(cache.get("query", &other).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_entry_is_deleted_on_read() {
    let (_dir, pool) = setup().await;
    let cache = ResponseCache::new(pool.clone(), 1);
    let s = settings();

    cache
        .set("old query", &s, "stale", &serde_json::json!([]))
        .await
        .unwrap();

    // Age the row past the 1 hour TTL.
    sqlx::query("UPDATE response_cache SET created_at = created_at - 7200")
        .execute(&pool)
        .await
        .unwrap();

    assert!(cache.get("old query", &s).await.unwrap().is_none());
    // The lazy expiry deleted the row, not just skipped it.
    assert_eq!(cache.stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn test_clear_expired_keeps_fresh_entries() {
    let (_dir, pool) = setup().await;
    let cache = ResponseCache::new(pool.clone(), 1);
    let s = settings();

    cache.set("old", &s, "a", &serde_json::json!([])).await.unwrap();
    sqlx::query("UPDATE response_cache SET created_at = created_at - 7200 WHERE query = 'old'")
        .execute(&pool)
        .await
        .unwrap();
    cache.set("fresh", &s, "b", &serde_json::json!([])).await.unwrap();

    assert_eq!(cache.clear_expired().await.unwrap(), 1);
    assert!(cache.get("fresh", &s).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalidate_query_is_case_insensitive() {
    let (_dir, pool) = setup().await;
    let cache = ResponseCache::new(pool, 24);
    let s = settings();

    cache
        .set("What Is Pricing", &s, "answer", &serde_json::json!([]))
        .await
        .unwrap();

    assert!(cache.invalidate_query("what is pricing").await.unwrap());
    assert!(cache.get("What Is Pricing", &s).await.unwrap().is_none());
    // Second invalidation finds nothing.
    assert!(!cache.invalidate_query("what is pricing").await.unwrap());
}

#[tokio::test]
async fn test_invalidate_query_ignores_stored_whitespace() {
    let (_dir, pool) = setup().await;
    let cache = ResponseCache::new(pool, 24);
    let s = settings();

    cache
        .set("  what is pricing  ", &s, "answer", &serde_json::json!([]))
        .await
        .unwrap();

    assert!(cache.invalidate_query("what is pricing").await.unwrap());
    assert_eq!(cache.stats().await.unwrap().total_entries, 0);
}

#[tokio::test]
async fn test_audit_hash_records_temperature_without_splitting_key() {
    let (_dir, pool) = setup().await;
    let cache = ResponseCache::new(pool.clone(), 24);
    let warm = settings();
    let mut cold = settings();
    cold.temperature = 0.1;

    cache.set("query", &warm, "a", &serde_json::json!([])).await.unwrap();
    let first: String = sqlx::query_scalar("SELECT settings_hash FROM response_cache")
        .fetch_one(&pool)
        .await
        .unwrap();

    // Same key: the second write replaces the row, and the audit hash
    // now reflects the different temperature.
    cache.set("query", &cold, "b", &serde_json::json!([])).await.unwrap();
    let second: String = sqlx::query_scalar("SELECT settings_hash FROM response_cache")
        .fetch_one(&pool)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(cache.stats().await.unwrap().total_entries, 1);
    assert_eq!(cache.get("query", &warm).await.unwrap().unwrap().answer, "b");
}

// ============ Query log ============

#[tokio::test]
async fn test_query_log_roundtrip_with_feedback() {
    let (_dir, pool) = setup().await;
    let logger = QueryLogger::new(pool);

    let id = logger
        .log("question", &[0.8, 0.6], 120, Some("question expanded"), "gemma2:2b")
        .await
        .unwrap();
    logger.update_feedback(id, "positive").await.unwrap();

    let recent = logger.get_recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, id);
    assert_eq!(recent[0].feedback.as_deref(), Some("positive"));
    assert!((recent[0].avg_retrieval_score - 0.7).abs() < 1e-9);
    assert_eq!(recent[0].num_chunks_retrieved, 2);

    let stats = logger.get_stats().await.unwrap();
    assert_eq!(stats.total_queries, 1);
    assert_eq!(stats.positive_feedback, 1);
    assert_eq!(stats.negative_feedback, 0);
}

#[tokio::test]
async fn test_low_score_queries_surface_knowledge_gaps() {
    let (_dir, pool) = setup().await;
    let logger = QueryLogger::new(pool);

    logger.log("good", &[0.9], 50, None, "m").await.unwrap();
    logger.log("bad", &[0.1], 50, None, "m").await.unwrap();
    logger.log("empty", &[], 50, None, "m").await.unwrap();

    let low = logger.get_low_score_queries(0.5, 10).await.unwrap();
    let queries: Vec<&str> = low.iter().map(|l| l.query.as_str()).collect();
    assert_eq!(queries, vec!["empty", "bad"]);
}

#[tokio::test]
async fn test_common_queries_grouped_case_insensitively() {
    let (_dir, pool) = setup().await;
    let logger = QueryLogger::new(pool);

    logger.log("What is pricing", &[0.5], 50, None, "m").await.unwrap();
    logger.log("what is pricing", &[0.5], 50, None, "m").await.unwrap();
    logger.log("careers", &[0.5], 50, None, "m").await.unwrap();

    let common = logger.get_common_queries(10).await.unwrap();
    assert_eq!(common[0], ("what is pricing".to_string(), 2));
    assert_eq!(common[1], ("careers".to_string(), 1));
}
