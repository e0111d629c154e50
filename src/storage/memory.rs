//! In-memory store.
//!
//! Mirrors [`SqlStore`](super::SqlStore) semantics closely enough for the
//! scraper and server tests, without a database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{ArticleStream, Store, SummaryGroup};
use crate::error::{AppError, Result};
use crate::models::{
    Article, DatePubCount, Filter, Publication, format_stored_time, normalize_timestamp,
};

#[derive(Debug, Clone)]
struct Stored {
    article: Article,
    pub_id: i64,
    added: String,
}

#[derive(Debug, Default)]
struct Inner {
    publications: BTreeMap<i64, Publication>,
    articles: BTreeMap<i64, Stored>,
    next_pub_id: i64,
    next_article_id: i64,
}

impl Inner {
    fn find_or_create_publication(&mut self, publication: &Publication) -> i64 {
        let lookups: [(&str, fn(&Publication) -> &str); 3] = [
            (publication.code.as_str(), |p| p.code.as_str()),
            (publication.name.as_str(), |p| p.name.as_str()),
            (publication.domain.as_str(), |p| p.domain.as_str()),
        ];
        for (value, field) in lookups {
            if value.is_empty() {
                continue;
            }
            if let Some((id, _)) = self.publications.iter().find(|(_, p)| field(p) == value) {
                return *id;
            }
        }

        self.next_pub_id += 1;
        self.publications
            .insert(self.next_pub_id, publication.clone());
        self.next_pub_id
    }

    fn matches(&self, stored: &Stored, filter: &Filter) -> bool {
        let art = &stored.article;
        let code = self
            .publications
            .get(&stored.pub_id)
            .map(|p| p.code.as_str())
            .unwrap_or_default();

        let at_or_after = |v: &str, bound: &Option<chrono::DateTime<Utc>>| {
            bound.is_none_or(|b| v >= format_stored_time(&b).as_str())
        };
        let before = |v: &str, bound: &Option<chrono::DateTime<Utc>>| {
            bound.is_none_or(|b| v < format_stored_time(&b).as_str())
        };

        at_or_after(&art.published, &filter.pub_from)
            && before(&art.published, &filter.pub_to)
            && at_or_after(&stored.added, &filter.added_from)
            && before(&stored.added, &filter.added_to)
            && filter.since_id.is_none_or(|since| art.id > since)
            && (filter.pub_codes.is_empty() || filter.pub_codes.iter().any(|c| c == code))
            && !filter.xpub_codes.iter().any(|c| c == code)
    }

    fn hydrate(&self, stored: &Stored) -> Article {
        let mut art = stored.article.clone();
        if let Some(p) = self.publications.get(&stored.pub_id) {
            art.publication = p.clone();
        }
        art
    }

    fn matching(&self, filter: &Filter) -> Vec<Article> {
        let hits = self
            .articles
            .values()
            .filter(|s| self.matches(s, filter))
            .map(|s| self.hydrate(s));
        match filter.count {
            Some(n) => hits.take(n).collect(),
            None => hits.collect(),
        }
    }
}

/// Map-backed [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panic elsewhere leaves plain data behind, still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored articles.
    pub fn len(&self) -> usize {
        self.lock().articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn which_are_new(&self, urls: &[String]) -> Result<Vec<String>> {
        let inner = self.lock();
        Ok(urls
            .iter()
            .filter(|u| !inner.articles.values().any(|s| s.article.urls.contains(u)))
            .cloned()
            .collect())
    }

    async fn find_urls(&self, urls: &[String]) -> Result<Vec<i64>> {
        let inner = self.lock();
        Ok(inner
            .articles
            .iter()
            .filter(|(_, s)| s.article.urls.iter().any(|u| urls.contains(u)))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn stash(&self, art: &Article) -> Result<i64> {
        art.validate()?;
        let mut inner = self.lock();

        let id = if art.id == 0 {
            inner.next_article_id += 1;
            inner.next_article_id
        } else if inner.articles.contains_key(&art.id) {
            art.id
        } else {
            return Err(AppError::validation(format!("no article with id {}", art.id)));
        };

        let pub_id = inner.find_or_create_publication(&art.publication);
        let mut article = art.clone();
        article.id = id;
        article.published = normalize_timestamp(&art.published);
        article.updated = normalize_timestamp(&art.updated);

        inner.articles.insert(
            id,
            Stored {
                article,
                pub_id,
                added: format_stored_time(&Utc::now()),
            },
        );
        Ok(id)
    }

    async fn fetch_count(&self, filter: &Filter) -> Result<i64> {
        let inner = self.lock();
        let n = inner
            .articles
            .values()
            .filter(|s| inner.matches(s, filter))
            .count();
        Ok(n as i64)
    }

    fn fetch(&self, filter: &Filter, cancel: &CancellationToken) -> ArticleStream {
        let articles = self.lock().matching(filter);
        ArticleStream::spawn(cancel, move |tx| async move {
            for art in articles {
                if tx.is_cancelled() || !tx.send(Ok(art)).await {
                    return;
                }
            }
        })
    }

    async fn fetch_article(&self, id: i64) -> Result<Option<Article>> {
        let inner = self.lock();
        Ok(inner.articles.get(&id).map(|s| inner.hydrate(s)))
    }

    async fn fetch_publications(&self) -> Result<Vec<Publication>> {
        let mut pubs: Vec<Publication> = self.lock().publications.values().cloned().collect();
        pubs.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(pubs)
    }

    async fn fetch_summary(
        &self,
        filter: &Filter,
        group: SummaryGroup,
    ) -> Result<Vec<DatePubCount>> {
        let inner = self.lock();
        let mut counts: BTreeMap<(String, String), i64> = BTreeMap::new();
        for stored in inner.articles.values().filter(|s| inner.matches(s, filter)) {
            let stamp = match group {
                SummaryGroup::Published => &stored.article.published,
                SummaryGroup::Added => &stored.added,
            };
            let day: String = stamp.chars().take(10).collect();
            let code = inner
                .publications
                .get(&stored.pub_id)
                .map(|p| p.code.clone())
                .unwrap_or_default();
            *counts.entry((day, code)).or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((day, pub_code), count)| DatePubCount {
                day,
                pub_code,
                count,
            })
            .collect())
    }
}
