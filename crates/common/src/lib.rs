//! CategoryRank Common Library
//!
//! Shared code for the CategoryRank services including:
//! - Rank registry store (Postgres and in-memory)
//! - MediaWiki page source abstraction
//! - Error types and handling
//! - Configuration management
//! - Redis result cache
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod source;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{CategoryRecord, RankState, RankStore, RankedEntry};
pub use errors::{AppError, Result};
pub use source::{CatalogSource, PageSource};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
