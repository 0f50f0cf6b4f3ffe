use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            llm_model: default_llm_model(),
            embedding_model: default_embedding_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "gemma2:2b".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_words")]
    pub chunk_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_words: default_chunk_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_chunk_words() -> usize {
    300
}
fn default_overlap_words() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            dense_weight: default_dense_weight(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_dense_weight() -> f64 {
    0.7
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_rrf_k() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackConfig {
    /// Negative feedbacks on the same query before it is flagged for
    /// review.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: i64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            flag_threshold: default_flag_threshold(),
        }
    }
}

fn default_flag_threshold() -> i64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
        }
    }
}

fn default_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_words == 0 {
        anyhow::bail!("chunking.chunk_words must be > 0");
    }
    if config.chunking.overlap_words >= config.chunking.chunk_words {
        anyhow::bail!("chunking.overlap_words must be < chunking.chunk_words");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.dense_weight < 0.0 || config.retrieval.lexical_weight < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0");
    }
    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }

    // Validate feedback and cache
    if config.feedback.flag_threshold < 1 {
        anyhow::bail!("feedback.flag_threshold must be >= 1");
    }
    if config.cache.ttl_hours < 1 {
        anyhow::bail!("cache.ttl_hours must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let f = write_config(
            r#"
            [db]
            path = "/tmp/askcorpus.db"
            [server]
            bind = "127.0.0.1:8000"
            "#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!((cfg.retrieval.dense_weight - 0.7).abs() < 1e-12);
        assert_eq!(cfg.feedback.flag_threshold, 2);
        assert_eq!(cfg.cache.ttl_hours, 24);
        assert_eq!(cfg.ollama.url, "http://localhost:11434");
    }

    #[test]
    fn test_rejects_overlap_ge_chunk() {
        let f = write_config(
            r#"
            [db]
            path = "/tmp/askcorpus.db"
            [server]
            bind = "127.0.0.1:8000"
            [chunking]
            chunk_words = 100
            overlap_words = 100
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_zero_flag_threshold() {
        let f = write_config(
            r#"
            [db]
            path = "/tmp/askcorpus.db"
            [server]
            bind = "127.0.0.1:8000"
            [feedback]
            flag_threshold = 0
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
