//! Catalog Translator - translation core for a video catalog viewer
//!
//! Translates scraped titles, descriptions, comments, tags and artist names
//! through a quota-tracked remote API or an on-device model, and keeps every
//! result in a durable SQLite cache.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod core;

// Re-export key types for convenience
pub use core::{
    cache::{CacheStore, SqliteCacheStore},
    client::RemoteEngine,
    config::TranslationSettings,
    errors::TranslationError,
    local::{LocalModelEngine, OnDeviceModel},
    models::{ContentType, EngineKind, ModelStatus, TranslationRecord},
    ollama::OllamaModel,
    orchestrator::TranslationManager,
    stats::TranslationStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
