//! # askcorpus-core
//!
//! Core retrieval algorithms for askcorpus, a retrieval-augmented question
//! answering engine over a private text corpus.
//!
//! This crate is deliberately free of database, network, and configuration
//! dependencies. The calling application supplies the corpus, the vector
//! index, and the embedder through traits; the core supplies the ranking
//! machinery:
//!
//! - BM25 lexical scoring over a tokenized corpus snapshot ([`lexical`])
//! - Reciprocal Rank Fusion of dense and lexical rankings ([`fusion`])
//! - The hybrid retriever combining both, with a build-once lexical
//!   snapshot guarded against duplicate construction ([`retriever`])
//! - Collaborator traits for the vector index, corpus store, embedder,
//!   and text generator ([`traits`])
//! - An in-memory vector index and corpus store for tests and embedded
//!   use ([`memory`])

pub mod embedding;
pub mod fusion;
pub mod lexical;
pub mod memory;
pub mod models;
pub mod retriever;
pub mod traits;
