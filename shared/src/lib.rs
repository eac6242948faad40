//! Re-exports the shared building blocks consumed by the ProductMind
//! services: configuration, error types, the template store, the AI
//! provider chain, batch production and the static page renderer.

pub mod ai_provider;
pub mod config;
pub mod db;
pub mod dto;
pub mod error;
pub mod memory_store;
pub mod orchestrator;
pub mod provider_settings;
pub mod renderer;
pub mod search;
pub mod store;
pub mod stream_parser;
pub mod utils;
