// src/services/extract.rs

//! Turning a fetched article page into an [`Article`].
//!
//! Site-specific extraction is pluggable through [`ArticleExtractor`]. The
//! bundled [`MetaExtractor`] relies only on the metadata most news sites
//! publish (`<link rel=canonical>`, OpenGraph, `article:*` meta tags).

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Article, Author, Keyword};
use crate::utils::{normalize_url, resolve_url};

/// Converts raw HTML into an article.
pub trait ArticleExtractor: Send + Sync {
    /// `url` is the address the page was actually fetched from.
    fn extract(&self, html: &str, url: &Url) -> Result<Article>;
}

/// Generic metadata-driven extractor.
#[derive(Debug, Clone)]
pub struct MetaExtractor {
    canonical: Selector,
    title: Selector,
    meta: Selector,
    body: Selector,
}

impl MetaExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            canonical: parse_selector(r#"link[rel="canonical"]"#)?,
            title: parse_selector("title")?,
            meta: parse_selector("meta")?,
            body: parse_selector("article")?,
        })
    }

    fn meta_values<'a>(&self, doc: &'a Html, key: &str) -> Vec<&'a str> {
        doc.select(&self.meta)
            .filter(|m| {
                let v = m.value();
                v.attr("property") == Some(key) || v.attr("name") == Some(key)
            })
            .filter_map(|m| m.value().attr("content"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn first_meta<'a>(&self, doc: &'a Html, keys: &[&str]) -> Option<&'a str> {
        keys.iter()
            .find_map(|k| self.meta_values(doc, k).into_iter().next())
    }
}

impl ArticleExtractor for MetaExtractor {
    fn extract(&self, html: &str, url: &Url) -> Result<Article> {
        let doc = Html::parse_document(html);
        let mut art = Article::with_url(url.as_str());

        if let Some(href) = doc
            .select(&self.canonical)
            .filter_map(|l| l.value().attr("href"))
            .next()
        {
            if let Some(canonical) = resolve_url(url, href) {
                let canonical = normalize_url(canonical).to_string();
                art.canonical_url = canonical.clone();
                art.add_url(canonical);
            }
        }
        if let Some(og_url) = self.first_meta(&doc, &["og:url"]) {
            if let Some(u) = resolve_url(url, og_url) {
                art.add_url(normalize_url(u).to_string());
            }
        }

        art.headline = match self.first_meta(&doc, &["og:title", "twitter:title"]) {
            Some(t) => t.to_string(),
            None => doc
                .select(&self.title)
                .next()
                .map(element_text)
                .unwrap_or_default(),
        };
        if art.headline.is_empty() {
            return Err(AppError::extract(url.as_str(), "no headline found"));
        }

        art.published = self
            .first_meta(&doc, &["article:published_time", "date", "dc.date"])
            .unwrap_or_default()
            .to_string();
        art.updated = self
            .first_meta(&doc, &["article:modified_time", "og:updated_time"])
            .unwrap_or_default()
            .to_string();
        art.section = self
            .first_meta(&doc, &["article:section"])
            .unwrap_or_default()
            .to_string();

        for name in self.meta_values(&doc, "author") {
            push_author(&mut art.authors, name);
        }
        for name in self.meta_values(&doc, "article:author") {
            // article:author is often a profile URL rather than a name
            if name.starts_with("http") {
                continue;
            }
            push_author(&mut art.authors, name);
        }

        for tags in self
            .meta_values(&doc, "keywords")
            .into_iter()
            .chain(self.meta_values(&doc, "article:tag"))
        {
            for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                if !art.keywords.iter().any(|k| k.name == tag) {
                    art.keywords.push(Keyword {
                        name: tag.to_string(),
                        url: String::new(),
                    });
                }
            }
        }

        if let Some(site) = self.first_meta(&doc, &["og:site_name"]) {
            art.publication.name = site.to_string();
        }
        art.publication.domain = url.host_str().unwrap_or_default().to_string();

        art.content = doc
            .select(&self.body)
            .next()
            .map(|a| a.inner_html().trim().to_string())
            .unwrap_or_default();

        Ok(art)
    }
}

fn push_author(authors: &mut Vec<Author>, name: &str) {
    if !authors.iter().any(|a| a.name == name) {
        authors.push(Author {
            name: name.to_string(),
            ..Author::default()
        });
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::selector(css, e))
}
