// src/pipeline/scrape.rs

//! Scraping pipelines: discovery dry runs, periodic scraping, list ingestion.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::services::{RunStats, Scraper};
use crate::storage::Store;

/// Resolve the requested scraper names; none means every configured one.
pub fn select_scrapers(config: &Config, names: &[String]) -> Result<Vec<String>> {
    if names.is_empty() {
        if config.scrapers.is_empty() {
            return Err(AppError::config("no scrapers configured"));
        }
        return Ok(config.scrapers.keys().cloned().collect());
    }

    for name in names {
        config.scraper(name)?;
    }
    let mut seen = HashSet::new();
    Ok(names
        .iter()
        .filter(|n| seen.insert(n.as_str()))
        .cloned()
        .collect())
}

/// Run discovery for one scraper and return the article URLs found.
pub async fn run_discover(config: &Config, name: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
    let scraper = Scraper::from_config(name, config)?;
    scraper.discover(cancel).await
}

/// Scrape the named publications concurrently, one task each.
///
/// With `once`, every scraper does a single run and failures are reported.
/// Otherwise each loops on its period until `cancel` fires.
pub async fn run_scrape(
    config: &Config,
    store: Arc<dyn Store>,
    names: &[String],
    once: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let names = select_scrapers(config, names)?;
    let scrapers = names
        .iter()
        .map(|name| Scraper::from_config(name, config))
        .collect::<Result<Vec<_>>>()?;

    log::info!("Starting {} scrapers: {}", scrapers.len(), names.join(", "));

    let mut tasks: JoinSet<(String, Result<Option<RunStats>>)> = JoinSet::new();
    for scraper in scrapers {
        let store = Arc::clone(&store);
        let cancel = cancel.child_token();
        tasks.spawn(async move {
            let name = scraper.name().to_string();
            let result = if once {
                scraper.run_once(store.as_ref(), &cancel).await.map(Some)
            } else {
                scraper.start(store, cancel).await;
                Ok(None)
            };
            (name, result)
        });
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(Some(stats)))) => log::info!("{}: {}", name, stats),
            Ok((_, Ok(None))) | Ok((_, Err(AppError::Cancelled))) => {}
            Ok((name, Err(e))) => {
                log::error!("{}: run failed: {}", name, e);
                failed += 1;
            }
            Err(e) => {
                log::error!("scraper task panicked: {}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(AppError::validation(format!("{failed} scrapers failed")));
    }
    Ok(())
}

/// Scrape an explicit list of URLs with one scraper's rules.
pub async fn run_ingest(
    config: &Config,
    store: &dyn Store,
    name: &str,
    urls: &[String],
    update: bool,
    cancel: &CancellationToken,
) -> Result<RunStats> {
    let scraper = Scraper::from_config(name, config)?;
    scraper.run_from_list(urls, store, update, cancel).await
}

/// Read a URL list, one per line. Blank lines and `#` comments are skipped.
pub fn read_url_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_url_list(&content))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
