// src/services/discover.rs

//! Article link discovery.
//!
//! Walks a site's navigation pages breadth-first, collecting every link that
//! looks like an article. Navigation links are followed (within the allowed
//! hosts), article links are only collected.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;

use regex::Regex;
use scraper::{Html, Selector};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::DiscovererDef;
use crate::pipeline::budget::ErrorBudget;
use crate::services::extract::parse_selector;
use crate::services::pattern::{UrlMatcher, compile_regex, compile_regexes, request_uri};
use crate::utils::http::PageFetcher;
use crate::utils::{host_with_port, normalize_url, resolve_url, strip_fragment, strip_query};

/// Why a link was not taken as an article URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unparseable link")]
    BadUrl,
    #[error("bad host ({0})")]
    BadHost(String),
    #[error("non-article")]
    NotArticle,
}

/// Counters for one discovery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverStats {
    pub fetched: usize,
    pub errors: usize,
}

impl fmt::Display for DiscoverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pages fetched, {} errors", self.fetched, self.errors)
    }
}

/// Result of a completed discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub articles: BTreeSet<Url>,
    pub stats: DiscoverStats,
}

/// Crawl state for a single run.
#[derive(Debug, Default)]
struct Frontier {
    queue: VecDeque<Url>,
    queued: HashSet<Url>,
    seen: HashSet<Url>,
    found: BTreeSet<Url>,
}

impl Frontier {
    fn starting_at(url: Url) -> Self {
        let mut frontier = Self::default();
        frontier.enqueue(url);
        frontier
    }

    fn enqueue(&mut self, url: Url) {
        if self.seen.contains(&url) || self.queued.contains(&url) {
            return;
        }
        self.queued.insert(url.clone());
        self.queue.push_back(url);
    }

    fn next(&mut self) -> Option<Url> {
        let url = self.queue.pop_front()?;
        self.queued.remove(&url);
        self.seen.insert(url.clone());
        Some(url)
    }
}

/// Compiled discovery rules for one site.
#[derive(Debug, Clone)]
pub struct Discoverer {
    name: String,
    start_url: Url,
    matcher: UrlMatcher,
    nav_sel: Option<Selector>,
    xnav_pats: Vec<Regex>,
    cruft_sel: Option<Selector>,
    host_pat: Option<Regex>,
    base_error_threshold: usize,
    strip_query: bool,
    anchor_sel: Selector,
}

impl Discoverer {
    /// Compile a definition. Bad URLs, regexes or selectors fail here.
    pub fn new(def: &DiscovererDef) -> Result<Self> {
        let start_url = normalize_url(Url::parse(&def.url)?);
        let optional_selector = |css: &str| -> Result<Option<Selector>> {
            if css.trim().is_empty() {
                Ok(None)
            } else {
                parse_selector(css).map(Some)
            }
        };
        let host_pat = if def.host_pat.is_empty() {
            None
        } else {
            Some(compile_regex(&def.host_pat)?)
        };

        Ok(Self {
            name: def.name.clone(),
            start_url,
            matcher: UrlMatcher::new(def)?,
            nav_sel: optional_selector(&def.nav_sel)?,
            xnav_pats: compile_regexes(&def.xnav_pat)?,
            cruft_sel: optional_selector(&def.cruft_sel)?,
            host_pat,
            base_error_threshold: def.base_error_threshold,
            strip_query: !def.no_strip_query,
            anchor_sel: parse_selector("a[href]")?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_url(&self) -> &Url {
        &self.start_url
    }

    /// Crawl from the start page and return every article URL found.
    pub async fn run(
        &self,
        fetcher: &dyn PageFetcher,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome> {
        let mut frontier = Frontier::starting_at(self.start_url.clone());
        let mut budget = ErrorBudget::adaptive(self.base_error_threshold);

        while let Some(page_url) = frontier.next() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                r = fetcher.fetch(&page_url) => r,
            };
            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    log::warn!("{}: {}", self.name, e);
                    budget.fail()?;
                    continue;
                }
            };
            budget.record_success();

            let (articles, nav_links) = self.scan_page(&page_url, &page.body);
            log::debug!(
                "{}: visited {}, found {} articles",
                self.name,
                page_url,
                articles.len()
            );
            frontier.found.extend(articles);
            for link in nav_links {
                frontier.enqueue(link);
            }
        }

        let stats = DiscoverStats {
            fetched: budget.successes(),
            errors: budget.errors(),
        };
        Ok(DiscoveryOutcome {
            articles: frontier.found,
            stats,
        })
    }

    /// Article links and nav links on one page, after cruft removal.
    fn scan_page(&self, page_url: &Url, body: &str) -> (Vec<Url>, Vec<Url>) {
        let mut doc = Html::parse_document(body);

        if let Some(cruft) = &self.cruft_sel {
            let ids: Vec<_> = doc.select(cruft).map(|el| el.id()).collect();
            for id in ids {
                // nested cruft may already be gone along with its parent
                if let Some(mut node) = doc.tree.get_mut(id) {
                    node.detach();
                }
            }
        }

        let articles = doc
            .select(&self.anchor_sel)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| self.cook_article_url(page_url, href).ok())
            .collect();

        let nav_links = match &self.nav_sel {
            Some(sel) => doc
                .select(sel)
                .filter_map(|a| a.value().attr("href"))
                .filter_map(|href| self.cook_nav_url(page_url, href))
                .collect(),
            None => Vec::new(),
        };

        (articles, nav_links)
    }

    /// Apply this site's rules to a link, returning the canonical article URL.
    pub fn cook_article_url(
        &self,
        base: &Url,
        link: &str,
    ) -> std::result::Result<Url, Rejection> {
        let mut url = resolve_url(base, link).ok_or(Rejection::BadUrl)?;
        strip_fragment(&mut url);
        if self.strip_query {
            strip_query(&mut url);
        }
        let url = normalize_url(url);

        if !self.is_host_good(&url) {
            return Err(Rejection::BadHost(host_with_port(&url)));
        }
        if !self.matcher.is_article(&url) {
            return Err(Rejection::NotArticle);
        }
        Ok(url)
    }

    fn cook_nav_url(&self, base: &Url, link: &str) -> Option<Url> {
        let mut url = resolve_url(base, link)?;
        strip_fragment(&mut url);
        let url = normalize_url(url);

        if !self.is_host_good(&url) {
            return None;
        }
        let uri = request_uri(&url);
        if self.xnav_pats.iter().any(|re| re.is_match(&uri)) {
            return None;
        }
        Some(url)
    }

    fn is_host_good(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let host = host_with_port(url);
        match &self.host_pat {
            Some(re) => re.is_match(&host),
            None => host == host_with_port(&self.start_url),
        }
    }
}
