// src/models/article.rs

//! Article, author, keyword and publication data structures.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A byline attached to an article.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Author {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rel_link: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub twitter: String,
}

/// A keyword or tag attached to an article.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Keyword {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// A publication (newspaper, site, blog...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Publication {
    /// Short unique code, e.g. "guardian"
    pub code: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Primary domain
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
}

/// A single ingested news article.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Article {
    /// Store-assigned id; 0 means not yet persisted
    #[serde(default)]
    pub id: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canonical_url: String,

    /// All known URLs for the article, including the canonical one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub headline: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,

    /// Pre-sanitized HTML body
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// ISO 8601 string so partial dates (e.g. "2019-04") survive
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub published: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated: String,

    #[serde(default)]
    pub publication: Publication,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<Keyword>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub section: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl Article {
    /// Create an empty article known by a single URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Self::default()
        }
    }

    /// Add a URL unless it is already known.
    pub fn add_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if !url.is_empty() && !self.urls.contains(&url) {
            self.urls.push(url);
        }
    }

    /// Check the invariants every persisted article must hold.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.urls.is_empty() {
            return Err(crate::error::AppError::validation("article has no URLs"));
        }
        if self.publication.code.trim().is_empty() {
            return Err(crate::error::AppError::validation(
                "article has no publication code",
            ));
        }
        Ok(())
    }
}

/// Article count for one publication on one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatePubCount {
    /// "YYYY-MM-DD", or empty when the date is unknown
    pub day: String,
    pub pub_code: String,
    pub count: i64,
}

/// Timestamp layout used for storage and filter bounds.
pub const STORED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// `YYYY` or `YYYY-MM`.
fn is_partial_date(s: &str) -> bool {
    let digits = |part: &str, n: usize| part.len() == n && part.bytes().all(|b| b.is_ascii_digit());
    match s.split_once('-') {
        None => digits(s, 4),
        Some((year, month)) => digits(year, 4) && digits(month, 2),
    }
}

/// Format a UTC time the way it is stored.
pub fn format_stored_time(t: &DateTime<Utc>) -> String {
    t.format(STORED_TIME_FORMAT).to_string()
}

/// Normalize an ISO-8601-ish timestamp for storage.
///
/// Full timestamps become UTC `YYYY-MM-DDTHH:MM:SSZ`, so string order matches
/// time order. `YYYY` and `YYYY-MM` are kept as-is. Anything else maps to "".
pub fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return format_stored_time(&t.with_timezone(&Utc));
    }
    // RFC3339 without seconds: "2006-01-02T15:04Z07:00"
    if let Ok(t) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M%#z") {
        return format_stored_time(&t.with_timezone(&Utc));
    }
    for layout in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, layout) {
            return format_stored_time(&t.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return format_stored_time(&t.and_utc());
        }
    }
    if is_partial_date(raw) {
        return raw.to_string();
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_full_timestamps() {
        assert_eq!(
            normalize_timestamp("2019-04-01T10:30:00+01:00"),
            "2019-04-01T09:30:00Z"
        );
        assert_eq!(normalize_timestamp("2019-04-01T10:30"), "2019-04-01T10:30:00Z");
        assert_eq!(normalize_timestamp("2019-04-01"), "2019-04-01T00:00:00Z");
    }

    #[test]
    fn test_normalize_partial_and_garbage() {
        assert_eq!(normalize_timestamp("2019-04"), "2019-04");
        assert_eq!(normalize_timestamp("2019"), "2019");
        assert_eq!(normalize_timestamp("last tuesday"), "");
        assert_eq!(normalize_timestamp(""), "");
    }

    #[test]
    fn test_validate_requires_url_and_pubcode() {
        let mut art = Article::default();
        assert!(art.validate().is_err());

        art.add_url("https://example.com/1234-foo-bar");
        assert!(art.validate().is_err());

        art.publication.code = "example".to_string();
        assert!(art.validate().is_ok());
    }

    #[test]
    fn test_add_url_dedupes() {
        let mut art = Article::with_url("https://example.com/a");
        art.add_url("https://example.com/a");
        art.add_url("");
        art.add_url("https://example.com/b");
        assert_eq!(art.urls.len(), 2);
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let art = Article {
            id: 7,
            urls: vec!["https://example.com/x".to_string()],
            publication: Publication {
                code: "ex".to_string(),
                ..Publication::default()
            },
            ..Article::default()
        };
        let json = serde_json::to_value(&art).unwrap();
        assert_eq!(json["id"], 7);
        assert!(json.get("headline").is_none());
        assert!(json.get("extra").is_none());
    }
}
