//! BM25 lexical index over an in-memory corpus snapshot.
//!
//! The snapshot is a set of parallel arrays (chunks, token lists, document
//! lengths) built in one pass over the full corpus. Position `i` in every
//! array refers to the same chunk. The index is not updated incrementally;
//! new corpus content becomes visible only after a rebuild.
//!
//! Scoring is Okapi BM25 with `k1 = 1.5`, `b = 0.75` and an epsilon floor
//! of `0.25 × average IDF` for terms whose raw IDF is negative (terms
//! appearing in more than half the corpus).

use std::collections::HashMap;

use crate::models::Chunk;

const K1: f64 = 1.5;
const B: f64 = 0.75;
const EPSILON: f64 = 0.25;

/// Lower-case and split on alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// A chunk matched by lexical search, with its raw BM25 score.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Term-frequency ranking structure over the full chunk corpus.
pub struct LexicalIndex {
    chunks: Vec<Chunk>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

impl LexicalIndex {
    /// Build the index from the full chunk set.
    ///
    /// Returns `None` for an empty corpus; callers degrade to dense-only
    /// retrieval in that case. Building is `O(corpus size)` and expected
    /// to run once per process unless explicitly invalidated.
    pub fn build(chunks: Vec<Chunk>) -> Option<Self> {
        if chunks.is_empty() {
            return None;
        }

        let mut term_freqs: Vec<HashMap<String, usize>> = Vec::with_capacity(chunks.len());
        let mut doc_lens: Vec<usize> = Vec::with_capacity(chunks.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for chunk in &chunks {
            let tokens = tokenize(&chunk.text);
            doc_lens.push(tokens.len());

            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let n = chunks.len() as f64;
        let total_len: usize = doc_lens.iter().sum();
        let avgdl = total_len as f64 / n;

        // Raw IDF first; negative values (very common terms) are then
        // floored at epsilon times the corpus average.
        let mut idf: HashMap<String, f64> = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative_terms: Vec<String> = Vec::new();
        for (term, df) in &doc_freq {
            let value = (n - *df as f64 + 0.5).ln() - (*df as f64 + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative_terms.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }
        let average_idf = idf_sum / idf.len() as f64;
        let floor = EPSILON * average_idf;
        for term in negative_terms {
            idf.insert(term, floor);
        }

        Some(Self {
            chunks,
            term_freqs,
            doc_lens,
            avgdl,
            idf,
        })
    }

    /// Number of chunks in the snapshot.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Score `query` against every chunk and return the top `top_n`
    /// matches by descending score.
    ///
    /// Chunks with a zero score are excluded: no lexical overlap means no
    /// lexical match, even though the score is technically computable.
    pub fn query(&self, query: &str, top_n: usize) -> Vec<LexicalHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = (0..self.chunks.len())
            .map(|i| (i, self.score_document(&query_tokens, i)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);

        scored
            .into_iter()
            .map(|(i, score)| LexicalHit {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }

    fn score_document(&self, query_tokens: &[String], doc: usize) -> f64 {
        let freqs = &self.term_freqs[doc];
        let dl = self.doc_lens[doc] as f64;
        let norm = K1 * (1.0 - B + B * dl / self.avgdl);

        query_tokens
            .iter()
            .filter_map(|token| {
                let idf = self.idf.get(token)?;
                let tf = *freqs.get(token)? as f64;
                Some(idf * tf * (K1 + 1.0) / (tf + norm))
            })
            .sum()
    }
}
