//! # askcorpus
//!
//! Retrieval-augmented question answering over a private corpus.
//!
//! This crate wires the ranking machinery from `askcorpus-core` into a
//! working application: SQLite-backed corpus and vector storage, an Ollama
//! client for embeddings and generation, a feedback ledger that learns
//! from thumbs up/down signals, a TTL'd response cache, query analytics,
//! and both a CLI (`askc`) and an HTTP API on top.
//!
//! ## Pipeline
//!
//! `ask` runs: cache lookup → optional query expansion or HyDE → hybrid
//! retrieval → feedback adjustments and learned boosts → prompt assembly →
//! generation → cache write → analytics log.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod db;
pub mod expansion;
pub mod feedback;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod store;
