//! memstack: a local-first memory store for development sessions.
//!
//! Session notes and plans live as markdown under a memory root;
//! structured facts (sessions, insights, plan tasks, project context)
//! live in a SQLite database; and a semantic index over the markdown
//! answers natural-language queries. Everything runs locally except the
//! optional OpenAI embedding provider.

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod export;
pub mod import_md;
pub mod indexer;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod searcher;
pub mod store;
