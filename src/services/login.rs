// src/services/login.rs

//! Authentication step run before each scrape.

use async_trait::async_trait;

use crate::error::Result;

/// Logs a scraper's HTTP session in, e.g. for paywalled sites.
///
/// Implementations usually share a cookie jar with the scraper's fetcher.
#[async_trait]
pub trait Login: Send + Sync {
    async fn login(&self) -> Result<()>;
}

/// For sites that need no authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLogin;

#[async_trait]
impl Login for NoLogin {
    async fn login(&self) -> Result<()> {
        Ok(())
    }
}
