// src/services/scraper.rs

//! Per-publication scrape cycle.
//!
//! One run is: log in, discover article links, drop the ones already
//! stored, then fetch, extract and stash the rest. [`Scraper::start`] repeats
//! that on a fixed period until cancelled.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Article, Config, DEFAULT_RUN_PERIOD_SECS, ScraperConfig};
use crate::pipeline::budget::ErrorBudget;
use crate::services::discover::{DiscoverStats, Discoverer};
use crate::services::extract::{ArticleExtractor, MetaExtractor};
use crate::services::login::{Login, NoLogin};
use crate::storage::Store;
use crate::utils::http::{HttpFetcher, PageFetcher, load_cookie_file};

/// Counters for one scrape run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Discovery pages fetched
    pub fetched: usize,
    /// Discovery, fetch, extract and stash failures
    pub errors: usize,
    /// Article URLs found (or supplied)
    pub found: usize,
    /// URLs not already in the store
    pub new: usize,
    pub stashed: usize,
    /// Skipped because another URL of the same article is stored
    pub skipped: usize,
    pub elapsed: Duration,
}

impl RunStats {
    fn absorb_discovery(&mut self, stats: DiscoverStats) {
        self.fetched += stats.fetched;
        self.errors += stats.errors;
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} found, {} new, {} stashed, {} skipped, {} errors ({} pages) in {:.1?}",
            self.found,
            self.new,
            self.stashed,
            self.skipped,
            self.errors,
            self.fetched,
            self.elapsed
        )
    }
}

enum Handled {
    Stashed(i64),
    AlreadyHave(i64),
}

/// Scrapes one publication.
pub struct Scraper {
    name: String,
    config: ScraperConfig,
    discoverer: Discoverer,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ArticleExtractor>,
    login: Arc<dyn Login>,
    period: Duration,
}

impl Scraper {
    pub fn new(
        name: impl Into<String>,
        config: ScraperConfig,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn ArticleExtractor>,
        login: Arc<dyn Login>,
    ) -> Result<Self> {
        let name = name.into();
        let mut def = config.discover.clone();
        if def.name.is_empty() {
            def.name = name.clone();
        }
        let discoverer = Discoverer::new(&def)?;

        Ok(Self {
            name,
            config,
            discoverer,
            fetcher,
            extractor,
            login,
            period: Duration::from_secs(DEFAULT_RUN_PERIOD_SECS),
        })
    }

    /// Build a scraper from application config with the stock HTTP fetcher,
    /// metadata extractor and no login.
    pub fn from_config(name: &str, config: &Config) -> Result<Self> {
        let scraper_config = config.scraper(name)?.clone();

        let jar = if scraper_config.wants_cookie_jar() {
            let jar = match &scraper_config.cookie_file {
                Some(path) => load_cookie_file(path)?,
                None => reqwest::cookie::Jar::default(),
            };
            Some(Arc::new(jar))
        } else {
            None
        };
        let fetcher = HttpFetcher::builder(
            &config.crawler,
            &scraper_config.discover.user_agent,
            jar,
        )?;

        Ok(Self::new(
            name,
            scraper_config,
            Arc::new(fetcher),
            Arc::new(MetaExtractor::new()?),
            Arc::new(NoLogin),
        )?
        .with_period(Duration::from_secs(config.crawler.run_period_secs)))
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn discoverer(&self) -> &Discoverer {
        &self.discoverer
    }

    fn pub_code(&self) -> &str {
        if self.config.pub_code.is_empty() {
            &self.name
        } else {
            &self.config.pub_code
        }
    }

    async fn login(&self) -> Result<()> {
        self.login.login().await.map_err(|e| {
            log::error!("{}: login failed: {}", self.name, e);
            e
        })
    }

    /// Run discovery only.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let outcome = self.discoverer.run(self.fetcher.as_ref(), cancel).await?;
        log::info!(
            "{}: discovered {} articles ({})",
            self.name,
            outcome.articles.len(),
            outcome.stats
        );
        Ok(outcome.articles.into_iter().map(String::from).collect())
    }

    /// One complete cycle: login, discover, filter known, scrape and stash.
    pub async fn run_once(&self, store: &dyn Store, cancel: &CancellationToken) -> Result<RunStats> {
        let start = Instant::now();
        let mut stats = RunStats::default();
        log::info!("{}: start run", self.name);

        self.login().await?;

        let outcome = self.discoverer.run(self.fetcher.as_ref(), cancel).await?;
        stats.absorb_discovery(outcome.stats);
        let found: Vec<String> = outcome.articles.into_iter().map(String::from).collect();
        stats.found = found.len();

        let new = store.which_are_new(&found).await?;
        stats.new = new.len();
        log::info!(
            "{}: found {} articles, {} new ({} pages fetched, {} errors)",
            self.name,
            stats.found,
            stats.new,
            outcome.stats.fetched,
            outcome.stats.errors
        );

        let result = self.fetch_and_stash(&new, store, false, cancel, &mut stats).await;
        stats.elapsed = start.elapsed();
        log::info!("{}: run finished: {}", self.name, stats);
        result.map(|_| stats)
    }

    /// Scrape a supplied list of URLs instead of discovering them.
    ///
    /// URLs go through the same cooking rules as discovered links. In update
    /// mode every URL is scraped and stored articles are replaced.
    pub async fn run_from_list(
        &self,
        urls: &[String],
        store: &dyn Store,
        update: bool,
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        let start = Instant::now();
        let mut stats = RunStats::default();
        log::info!("{}: start run from list", self.name);

        let base = self.discoverer.start_url().clone();
        let mut seen = HashSet::new();
        let mut cooked = Vec::new();
        let mut rejected = 0;
        for raw in urls {
            match self.discoverer.cook_article_url(&base, raw) {
                Ok(url) => {
                    let url = String::from(url);
                    if seen.insert(url.clone()) {
                        cooked.push(url);
                    }
                }
                Err(why) => {
                    log::info!("{}: reject {} ({})", self.name, raw, why);
                    rejected += 1;
                }
            }
        }
        stats.found = cooked.len();

        let todo = if update {
            cooked
        } else {
            store.which_are_new(&cooked).await?
        };
        stats.new = todo.len();
        log::info!("{}: {} articles, {} rejected", self.name, todo.len(), rejected);

        self.login().await?;

        let result = self.fetch_and_stash(&todo, store, update, cancel, &mut stats).await;
        stats.elapsed = start.elapsed();
        log::info!("{}: finished: {}", self.name, stats);
        result.map(|_| stats)
    }

    async fn fetch_and_stash(
        &self,
        urls: &[String],
        store: &dyn Store,
        update: bool,
        cancel: &CancellationToken,
        stats: &mut RunStats,
    ) -> Result<()> {
        let mut budget = ErrorBudget::for_scrape(urls.len());

        for url in urls {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            match self.handle_one(url, store, update, cancel).await {
                Ok(Handled::Stashed(id)) => {
                    budget.record_success();
                    stats.stashed += 1;
                    log::debug!("{}: stashed {} (id {})", self.name, url, id);
                }
                Ok(Handled::AlreadyHave(id)) => {
                    stats.skipped += 1;
                    log::info!("{}: already have {} (id {})", self.name, url, id);
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    log::warn!("{}: {} ({})", self.name, e, url);
                    stats.errors += 1;
                    budget.fail()?;
                }
            }
        }
        Ok(())
    }

    async fn handle_one(
        &self,
        url: &str,
        store: &dyn Store,
        update: bool,
        cancel: &CancellationToken,
    ) -> Result<Handled> {
        let mut art = self.scrape_article(url, cancel).await?;

        let ids = store.find_urls(&art.urls).await?;
        match ids.as_slice() {
            [] => {}
            [id] => art.id = *id,
            many => {
                return Err(AppError::Conflict(format!(
                    "{} resolves to {} articles",
                    url,
                    many.len()
                )));
            }
        }
        if art.id != 0 && !update {
            return Ok(Handled::AlreadyHave(art.id));
        }

        store.stash(&art).await.map(Handled::Stashed)
    }

    /// Fetch and extract a single article.
    pub async fn scrape_article(&self, url: &str, cancel: &CancellationToken) -> Result<Article> {
        let parsed = Url::parse(url)?;
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            r = self.fetcher.fetch(&parsed) => r?,
        };

        let mut art = self.extractor.extract(&page.body, &page.url)?;
        art.add_url(url);
        art.publication.code = self.pub_code().to_string();
        Ok(art)
    }

    /// Run forever on the configured period, until cancelled.
    ///
    /// A failed run is logged and the next one still happens on schedule. A
    /// run that overruns the period is followed immediately by the next.
    pub async fn start(&self, store: Arc<dyn Store>, cancel: CancellationToken) {
        loop {
            let started = Instant::now();
            match self.run_once(store.as_ref(), &cancel).await {
                Ok(_) => {}
                Err(AppError::Cancelled) => {
                    log::info!("{}: quit requested", self.name);
                    return;
                }
                Err(e) => log::error!("{}: run aborted: {}", self.name, e),
            }

            let delay = self.period.saturating_sub(started.elapsed());
            log::info!("{}: next run in {:?}", self.name, delay);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("{}: quit requested", self.name);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
