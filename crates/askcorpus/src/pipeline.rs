//! The question answering pipeline.
//!
//! `ask` runs the full chain: cache lookup, optional query reformulation,
//! hybrid retrieval, feedback adjustments and learned boosts, prompt
//! assembly, generation, then cache and analytics writes. A generation
//! failure propagates before anything is cached or logged, so a failed
//! request leaves no trace behind.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::analytics::QueryLogger;
use crate::cache::{CacheSettings, ResponseCache};
use crate::expansion::QueryExpander;
use crate::feedback::{FeedbackActions, FeedbackLearner};
use crate::prompts;
use askcorpus_core::models::RetrievalResult;
use askcorpus_core::retriever::HybridRetriever;
use askcorpus_core::traits::Generator;

/// Per-request knobs. Everything here except `temperature` participates
/// in the cache lookup key; temperature is still recorded in the cache
/// row's settings audit hash.
#[derive(Debug, Clone, Copy)]
pub struct AskOptions {
    pub top_k: usize,
    pub temperature: f32,
    pub use_expansion: bool,
    pub use_hybrid: bool,
    pub use_hyde: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            temperature: 0.7,
            use_expansion: true,
            use_hybrid: true,
            use_hyde: false,
        }
    }
}

impl AskOptions {
    fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            top_k: self.top_k,
            use_expansion: self.use_expansion,
            use_hybrid: self.use_hybrid,
            use_hyde: self.use_hyde,
            temperature: self.temperature,
        }
    }
}

/// Stage timings in milliseconds.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Timings {
    pub expansion_ms: i64,
    pub retrieval_ms: i64,
    pub generation_ms: i64,
    pub total_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct RagResponse {
    pub answer: String,
    /// Unique sources, one entry per distinct URL, in result order.
    pub sources: serde_json::Value,
    /// Chunk ids behind the answer, for feedback attribution.
    pub chunk_ids: Vec<String>,
    #[serde(skip)]
    pub retrieved: Vec<RetrievalResult>,
    pub query: String,
    pub expanded_query: Option<String>,
    pub cached: bool,
    pub log_id: Option<i64>,
    pub timings: Timings,
}

pub struct RagPipeline {
    retriever: Arc<HybridRetriever>,
    expander: QueryExpander,
    generator: Arc<dyn Generator>,
    learner: Arc<FeedbackLearner>,
    cache: Arc<ResponseCache>,
    logger: Arc<QueryLogger>,
    model_name: String,
}

impl RagPipeline {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        generator: Arc<dyn Generator>,
        learner: Arc<FeedbackLearner>,
        cache: Arc<ResponseCache>,
        logger: Arc<QueryLogger>,
        model_name: String,
    ) -> Self {
        Self {
            retriever,
            expander: QueryExpander::new(generator.clone()),
            generator,
            learner,
            cache,
            logger,
            model_name,
        }
    }

    /// Answer a question end to end.
    pub async fn ask(&self, question: &str, opts: AskOptions) -> Result<RagResponse> {
        let total_start = Instant::now();
        let settings = opts.cache_settings();

        if let Some(hit) = self.cache.get(question, &settings).await? {
            info!(query = question, "cache hit");
            return Ok(RagResponse {
                answer: hit.answer,
                sources: hit.sources,
                chunk_ids: Vec::new(),
                retrieved: Vec::new(),
                query: question.to_string(),
                expanded_query: None,
                cached: true,
                log_id: None,
                timings: Timings {
                    total_ms: total_start.elapsed().as_millis() as i64,
                    ..Timings::default()
                },
            });
        }

        // Reformulation only ever steers the lexical side of retrieval;
        // the dense side embeds the question as asked.
        let mut timings = Timings::default();
        let expanded_query = if opts.use_expansion {
            let t0 = Instant::now();
            let expanded = if opts.use_hyde {
                self.expander.hyde(question).await
            } else {
                self.expander.expand(question).await
            };
            timings.expansion_ms = t0.elapsed().as_millis() as i64;
            debug!(expanded = %expanded, "query reformulated");
            Some(expanded)
        } else {
            None
        };

        let t0 = Instant::now();
        let mut results = if opts.use_hybrid {
            self.retriever
                .retrieve(question, opts.top_k, expanded_query.as_deref())
                .await?
        } else {
            self.retriever.retrieve_dense(question, opts.top_k).await?
        };
        timings.retrieval_ms = t0.elapsed().as_millis() as i64;
        debug!(chunks = results.len(), "retrieval finished");

        self.learner.apply_adjustments(&mut results).await?;
        let boosts = self.learner.get_learned_boosts(question).await?;
        FeedbackLearner::apply_learned_boosts(&mut results, &boosts);

        let prompt = prompts::build_rag_prompt(question, &results);

        let t0 = Instant::now();
        let answer = self
            .generator
            .generate(&prompt, prompts::SYSTEM_PROMPT, opts.temperature)
            .await?;
        timings.generation_ms = t0.elapsed().as_millis() as i64;

        let sources = extract_sources(&results);
        let chunk_ids: Vec<String> = results
            .iter()
            .filter(|r| !r.chunk_id.is_empty())
            .map(|r| r.chunk_id.clone())
            .collect();

        self.cache.set(question, &settings, &answer, &sources).await?;

        timings.total_ms = total_start.elapsed().as_millis() as i64;

        let scores: Vec<f64> = results
            .iter()
            .map(|r| r.adjusted_score.unwrap_or(r.fused_score))
            .collect();
        let log_id = self
            .logger
            .log(
                question,
                &scores,
                timings.total_ms,
                expanded_query.as_deref(),
                &self.model_name,
            )
            .await?;

        info!(
            query = question,
            chunks = results.len(),
            total_ms = timings.total_ms,
            "question answered"
        );

        Ok(RagResponse {
            answer,
            sources,
            chunk_ids,
            retrieved: results,
            query: question.to_string(),
            expanded_query,
            cached: false,
            log_id: Some(log_id),
            timings,
        })
    }

    /// Record a feedback signal and run the ledger's automatic actions.
    pub async fn feedback(
        &self,
        query: &str,
        is_positive: bool,
        chunk_ids: &[String],
        log_id: Option<i64>,
    ) -> Result<FeedbackActions> {
        let actions = self
            .learner
            .process_feedback(query, is_positive, chunk_ids, Some(&self.cache))
            .await?;

        if let Some(log_id) = log_id {
            let verdict = if is_positive { "positive" } else { "negative" };
            self.logger.update_feedback(log_id, verdict).await?;
        }

        Ok(actions)
    }

    /// Invalidate the lexical snapshot after new content is ingested.
    pub async fn rebuild_index(&self) {
        self.retriever.rebuild().await;
    }
}

fn extract_sources(results: &[RetrievalResult]) -> serde_json::Value {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();

    for r in results {
        let url = &r.metadata.source_url;
        if url.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        sources.push(serde_json::json!({
            "title": if r.metadata.title.is_empty() { "Unknown" } else { &r.metadata.title },
            "author": if r.metadata.author.is_empty() { "Unknown" } else { &r.metadata.author },
            "url": url,
        }));
    }

    serde_json::Value::Array(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use askcorpus_core::models::{Chunk, ChunkMetadata};

    fn result_with_url(url: &str) -> RetrievalResult {
        RetrievalResult::from_chunk(&Chunk {
            id: format!("{}_0", url),
            text: "text".to_string(),
            metadata: ChunkMetadata {
                source_url: url.to_string(),
                title: "Title".to_string(),
                author: "Author".to_string(),
                ..ChunkMetadata::default()
            },
        })
    }

    #[test]
    fn test_sources_deduplicate_by_url() {
        let results = vec![
            result_with_url("https://example.com/a"),
            result_with_url("https://example.com/a"),
            result_with_url("https://example.com/b"),
        ];
        let sources = extract_sources(&results);
        assert_eq!(sources.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_sources_skip_empty_urls() {
        let results = vec![result_with_url("")];
        assert!(extract_sources(&results).as_array().unwrap().is_empty());
    }
}
