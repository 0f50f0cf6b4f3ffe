//! Query reformulation via the LLM.
//!
//! Two strategies, both optional per request:
//! - **expansion** — ask the model for synonyms and alternative phrasings,
//!   appended to the original query
//! - **HyDE** — ask the model for a short hypothetical answer and search
//!   with that instead (hypothetical document embedding)
//!
//! Both skip queries of two words or fewer (greetings) and fall back to
//! the original query on any LLM failure. Reformulation must never make a
//! question unanswerable.

use std::sync::Arc;

use tracing::warn;

use askcorpus_core::traits::Generator;

const EXPANSION_TEMPERATURE: f32 = 0.3;
const HYDE_TEMPERATURE: f32 = 0.5;

pub struct QueryExpander {
    generator: Arc<dyn Generator>,
}

impl QueryExpander {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    fn is_trivial(query: &str) -> bool {
        query.split_whitespace().count() <= 2
    }

    /// Expand a query with related terms and synonyms. Returns the
    /// original query followed by the expansion.
    pub async fn expand(&self, query: &str) -> String {
        if Self::is_trivial(query) {
            return query.to_string();
        }

        let prompt = format!(
            "You are a search query optimizer. Given a user's question, generate an \
            expanded version that includes:\n\
            1. The original question\n\
            2. Related keywords and synonyms\n\
            3. Alternative phrasings\n\n\
            Keep the expansion concise (under 100 words). Output ONLY the expanded \
            query, nothing else.\n\n\
            User question: {}\n\n\
            Expanded query:",
            query
        );

        match self.generator.generate(&prompt, "", EXPANSION_TEMPERATURE).await {
            Ok(expanded) => format!("{} {}", query, expanded.trim()),
            Err(e) => {
                warn!(error = %e, "query expansion failed, using original query");
                query.to_string()
            }
        }
    }

    /// Generate a hypothetical answer to search with instead of the
    /// question itself.
    pub async fn hyde(&self, query: &str) -> String {
        if Self::is_trivial(query) {
            return query.to_string();
        }

        let prompt = format!(
            "Given this question, write a short paragraph (50-100 words) that would \
            be a good answer. This will be used to find similar content.\n\n\
            Question: {}\n\n\
            Answer:",
            query
        );

        match self.generator.generate(&prompt, "", HYDE_TEMPERATURE).await {
            Ok(answer) => answer.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "HyDE generation failed, using original query");
                query.to_string()
            }
        }
    }
}
