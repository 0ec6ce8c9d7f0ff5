//! quill-core: resilient entity storage and document chunking
//!
//! This crate provides the persistence layer for users, documents,
//! conversations, messages, rewrites and profiles, with a SQLite backend
//! that degrades to an in-memory backend on failure, plus an adaptive
//! chunker that prepares long documents for downstream processing.

pub mod bootstrap;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod schema;
pub mod store;

pub use chunker::{Chunk, Chunker};
pub use config::Config;
pub use db::Database;
pub use error::Error;
pub use error::Result;
pub use store::{EntityStore, MemoryStore, ResilientStore};

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "quill";

