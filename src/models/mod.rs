// src/models/mod.rs

//! Domain models for the news ingestion application.
//!
//! Articles and publications, the filter used to select them, and the
//! application configuration.

mod article;
mod config;
mod filter;

// Re-export all public types
pub use article::{
    Article, Author, DatePubCount, Keyword, Publication, STORED_TIME_FORMAT, format_stored_time,
    normalize_timestamp,
};
pub use config::{
    Config, CrawlerConfig, DB_ENV_VAR, DEFAULT_RUN_PERIOD_SECS, DiscovererDef, ScraperConfig, ServerConfig, StorageConfig,
};
pub use filter::Filter;
