//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable that overrides `storage.url`.
pub const DB_ENV_VAR: &str = "NEWSHOUND_DB";

/// Default time between scrape run starts, in seconds.
pub const DEFAULT_RUN_PERIOD_SECS: u64 = 3 * 60 * 60;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connection settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// HTTP API settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-publication scraper definitions, keyed by scraper name
    #[serde(default)]
    pub scrapers: BTreeMap<String, ScraperConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// `NEWSHOUND_DB` takes precedence over the file's `storage.url`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            let mut config = Self::default();
            config.apply_env();
            config
        })
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(DB_ENV_VAR) {
            if !url.trim().is_empty() {
                self.storage.url = url;
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.storage.url.trim().is_empty() {
            return Err(AppError::validation("storage.url is empty"));
        }
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.run_period_secs == 0 {
            return Err(AppError::validation("crawler.run_period_secs must be > 0"));
        }
        if self.server.max_count == 0 {
            return Err(AppError::validation("server.max_count must be > 0"));
        }
        for (name, scraper) in &self.scrapers {
            if scraper.discover.url.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "scrapers.{name}.url is empty"
                )));
            }
            if scraper.discover.art_pat.is_empty() && scraper.discover.art_form.is_empty() {
                return Err(AppError::validation(format!(
                    "scrapers.{name} has neither art_pat nor art_form"
                )));
            }
        }
        Ok(())
    }

    /// Look up a scraper definition by name.
    pub fn scraper(&self, name: &str) -> Result<&ScraperConfig> {
        self.scrapers
            .get(name)
            .ok_or_else(|| AppError::config(format!("unknown scraper '{name}'")))
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `sqlite://...` or `postgres://...`
    #[serde(default = "defaults::db_url")]
    pub url: String,

    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: defaults::db_url(),
            max_connections: defaults::max_connections(),
        }
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum gap between consecutive requests from one client
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Time between the starts of consecutive scrape runs
    #[serde(default = "defaults::run_period")]
    pub run_period_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            run_period_secs: defaults::run_period(),
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::bind")]
    pub bind: String,

    /// Path prefix for every route, e.g. "/newshound"
    #[serde(default)]
    pub prefix: String,

    /// Largest page a client may request from `/api/slurp`
    #[serde(default = "defaults::max_count")]
    pub max_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::bind(),
            prefix: String::new(),
            max_count: defaults::max_count(),
        }
    }
}

/// Rules for crawling one site and classifying its links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscovererDef {
    /// Human readable name, used in logs
    #[serde(default)]
    pub name: String,

    /// Start page
    pub url: String,

    /// Raw regexes an article URL must match
    #[serde(default)]
    pub art_pat: Vec<String>,

    /// Raw regexes that reject an article URL
    #[serde(default)]
    pub xart_pat: Vec<String>,

    /// Simplified URL forms, e.g. "/YYYY/MM/SLUG.html"
    #[serde(default)]
    pub art_form: Vec<String>,

    #[serde(default)]
    pub xart_form: Vec<String>,

    /// CSS selector for navigation links; none means only the start page
    #[serde(default)]
    pub nav_sel: String,

    /// Regexes for nav pages that should never be crawled
    #[serde(default)]
    pub xnav_pat: Vec<String>,

    /// CSS selector for elements stripped before link extraction
    #[serde(default)]
    pub cruft_sel: String,

    /// Host regex; empty means the start URL's host only
    #[serde(default)]
    pub host_pat: String,

    /// Tolerated fetch errors before the adaptive allowance kicks in (0 = 5)
    #[serde(default)]
    pub base_error_threshold: usize,

    /// Keep query strings on article URLs
    #[serde(default)]
    pub no_strip_query: bool,

    /// Overrides `crawler.user_agent` for this site
    #[serde(default)]
    pub user_agent: String,
}

/// A discoverer definition plus scraper-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(flatten)]
    pub discover: DiscovererDef,

    /// Publication code for stored articles; defaults to the scraper name
    #[serde(default)]
    pub pub_code: String,

    /// Keep a cookie jar across requests
    #[serde(default)]
    pub cookies: bool,

    /// Netscape-format cookies.txt to preload (implies `cookies`)
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

impl ScraperConfig {
    pub fn wants_cookie_jar(&self) -> bool {
        self.cookies || self.cookie_file.is_some()
    }
}

mod defaults {
    pub fn db_url() -> String {
        "sqlite://newshound.db?mode=rwc".into()
    }
    pub fn max_connections() -> u32 {
        8
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; newshound/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        500
    }
    pub fn run_period() -> u64 {
        super::DEFAULT_RUN_PERIOD_SECS
    }

    // Server defaults
    pub fn bind() -> String {
        "127.0.0.1:12345".into()
    }
    pub fn max_count() -> usize {
        20000
    }
}
