//! Core translation module

pub mod batching;
pub mod cache;
pub mod client;
pub mod config;
pub mod credential;
pub mod engine;
pub mod errors;
pub mod local;
pub mod migration;
pub mod models;
pub mod ollama;
pub mod orchestrator;
pub mod stats;
