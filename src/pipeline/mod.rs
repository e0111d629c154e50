//! Pipeline entry points for the CLI.
//!
//! - `run_discover`: Crawl one site and report the article URLs found
//! - `run_scrape`: Scrape publications into the store, once or periodically
//! - `run_ingest`: Scrape a supplied URL list
//! - `run_serve`: Serve the HTTP API

pub mod budget;
pub mod scrape;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Config;
use crate::storage::{SqlStore, Store};

pub use scrape::{read_url_list, run_discover, run_ingest, run_scrape, select_scrapers};

/// Root token cancelled on Ctrl-C.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}

/// Connect to the configured database.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    Ok(Arc::new(SqlStore::connect(&config.storage).await?))
}

/// Serve the HTTP API until cancelled.
pub async fn run_serve(config: &Config, store: Arc<dyn Store>, cancel: CancellationToken) -> Result<()> {
    crate::server::serve(&config.server, store, cancel).await
}
