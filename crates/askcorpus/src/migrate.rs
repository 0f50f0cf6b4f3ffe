use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_url TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            published TEXT,
            categories_json TEXT NOT NULL DEFAULT '[]',
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunk embedding vectors table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create feedback ledger tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_adjustments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id TEXT UNIQUE NOT NULL,
            score_adjustment REAL NOT NULL DEFAULT 0,
            positive_count INTEGER NOT NULL DEFAULT 0,
            negative_count INTEGER NOT NULL DEFAULT 0,
            last_updated INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flagged_queries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            query_hash TEXT UNIQUE NOT NULL,
            negative_count INTEGER NOT NULL DEFAULT 1,
            flag_reason TEXT,
            status TEXT NOT NULL DEFAULT 'monitoring',
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            original_query TEXT NOT NULL,
            query_hash TEXT UNIQUE NOT NULL,
            successful_chunks TEXT NOT NULL DEFAULT '[]',
            positive_count INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            last_used INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create response cache table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS response_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query_hash TEXT UNIQUE NOT NULL,
            query TEXT NOT NULL,
            settings_hash TEXT NOT NULL,
            response TEXT NOT NULL,
            sources TEXT,
            created_at INTEGER NOT NULL,
            hit_count INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create analytics log table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            query TEXT NOT NULL,
            expanded_query TEXT,
            retrieval_scores TEXT,
            avg_retrieval_score REAL,
            num_chunks_retrieved INTEGER,
            response_time_ms INTEGER,
            feedback TEXT,
            model_used TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_url ON chunks(source_url)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_adjustments_chunk_id ON chunk_adjustments(chunk_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_flagged_query_hash ON flagged_queries(query_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mappings_query_hash ON query_mappings(query_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_query_hash ON response_cache(query_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_created_at ON response_cache(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON query_logs(timestamp)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_logs_avg_score ON query_logs(avg_retrieval_score)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
