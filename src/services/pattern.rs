// src/services/pattern.rs

//! Article URL classification.
//!
//! Patterns come in two flavours: raw regular expressions, and simplified
//! "forms" such as `/YYYY/MM/SLUG.html` where a handful of upper-case tokens
//! stand in for common URL components.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::DiscovererDef;

fn token_regex() -> Result<&'static Regex> {
    static TOKENS: OnceLock<Option<Regex>> = OnceLock::new();
    TOKENS
        .get_or_init(|| Regex::new("ID|SLUG|YYYY|MM|DD").ok())
        .as_ref()
        .ok_or_else(|| AppError::pattern("ID|SLUG|YYYY|MM|DD", "token regex failed to build"))
}

fn token_replacement(token: &str) -> &'static str {
    match token {
        "ID" => "([0-9]{4,})",
        "SLUG" => "([^/]+-[^/]+)",
        "YYYY" => r"(\d\d\d\d)",
        "MM" => "([01]?[0-9])",
        "DD" => "([0123]?[0-9])",
        _ => "",
    }
}

/// Compile a simplified URL form into a regex.
///
/// Everything except the tokens `ID`, `SLUG`, `YYYY`, `MM` and `DD` matches
/// literally. A trailing `$` anchors the end.
pub fn compile_form(form: &str) -> Result<Regex> {
    let (body, anchored) = match form.strip_suffix('$') {
        Some(body) => (body, true),
        None => (form, false),
    };

    let mut pattern = regex::escape(body);
    if anchored {
        pattern.push('$');
    }

    let pattern = token_regex()?
        .replace_all(&pattern, |caps: &Captures| token_replacement(&caps[0]))
        .into_owned();

    Regex::new(&pattern).map_err(|e| AppError::pattern(form, e))
}

/// Compile a raw regular expression.
pub fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::pattern(pattern, e))
}

/// Compile a list of raw regexes.
pub fn compile_regexes(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile_regex(p)).collect()
}

/// Accept/reject rules for article URLs.
#[derive(Debug, Clone, Default)]
pub struct UrlMatcher {
    accept: Vec<Regex>,
    reject: Vec<Regex>,
}

impl UrlMatcher {
    pub fn new(def: &DiscovererDef) -> Result<Self> {
        let mut accept = compile_regexes(&def.art_pat)?;
        for form in &def.art_form {
            accept.push(compile_form(form)?);
        }

        let mut reject = compile_regexes(&def.xart_pat)?;
        for form in &def.xart_form {
            reject.push(compile_form(form)?);
        }

        Ok(Self { accept, reject })
    }

    /// True if at least one accept pattern and no reject pattern matches.
    ///
    /// `request_uri` is the path plus any query, e.g. `/news/1234-foo?page=2`.
    pub fn matches(&self, request_uri: &str) -> bool {
        self.accept.iter().any(|re| re.is_match(request_uri))
            && !self.reject.iter().any(|re| re.is_match(request_uri))
    }

    /// Apply the rules to a full URL.
    pub fn is_article(&self, url: &Url) -> bool {
        self.matches(&request_uri(url))
    }
}

/// Path plus `?query` if present.
pub fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(forms: &[&str], xforms: &[&str]) -> UrlMatcher {
        let def = DiscovererDef {
            art_form: forms.iter().map(|s| s.to_string()).collect(),
            xart_form: xforms.iter().map(|s| s.to_string()).collect(),
            ..DiscovererDef::default()
        };
        UrlMatcher::new(&def).unwrap()
    }

    #[test]
    fn test_id_slug_form() {
        let m = matcher(&["/ID-SLUG"], &[]);
        assert!(m.matches("/news/space/12345-moon-made-of-cheese"));
        assert!(m.matches("/1234-blah-blah"));
        assert!(!m.matches("/123-too-short"));
        assert!(!m.matches("/news/space/"));
    }

    #[test]
    fn test_anchored_form() {
        let m = matcher(&["/ID-SLUG$"], &[]);
        assert!(m.matches("/1234-wibble-pibble"));
        assert!(!m.matches("/1234-wibble-pibble/blah.html"));
    }

    #[test]
    fn test_date_form_matches_literal_suffix() {
        let m = matcher(&["/YYYY/MM/SLUG.html"], &[]);
        assert!(m.matches("/2001/04/moon-made-of-cheese.html"));
        assert!(!m.matches("/2001/04/moon-made-of-cheese"));
        // '.' is literal, not a wildcard
        assert!(!m.matches("/2001/04/moon-made-of-cheeseXhtml"));
    }

    #[test]
    fn test_day_token() {
        let m = matcher(&["/YYYY/MM/DD/SLUG"], &[]);
        assert!(m.matches("/2019/4/1/big-news"));
        assert!(m.matches("/2019/12/31/big-news"));
        assert!(!m.matches("/2019/12/41/big-news"));
    }

    #[test]
    fn test_reject_overrides_accept() {
        let m = matcher(&["/ID-SLUG"], &["/video/"]);
        assert!(m.matches("/news/1234-foo-bar"));
        assert!(!m.matches("/video/1234-foo-bar"));
    }

    #[test]
    fn test_raw_patterns() {
        let def = DiscovererDef {
            art_pat: vec![r"/article/\d+$".to_string()],
            xart_pat: vec!["print=1".to_string()],
            ..DiscovererDef::default()
        };
        let m = UrlMatcher::new(&def).unwrap();
        assert!(m.matches("/article/99"));
        let url = Url::parse("https://example.com/article/99?print=1").unwrap();
        assert!(!m.is_article(&url));
    }

    #[test]
    fn test_no_accept_patterns_matches_nothing() {
        let m = matcher(&[], &[]);
        assert!(!m.matches("/anything"));
    }

    #[test]
    fn test_bad_regex_is_pattern_error() {
        let def = DiscovererDef {
            art_pat: vec!["(unclosed".to_string()],
            ..DiscovererDef::default()
        };
        assert!(matches!(
            UrlMatcher::new(&def),
            Err(AppError::Pattern { .. })
        ));
    }

    #[test]
    fn test_request_uri() {
        let url = Url::parse("https://example.com/a/b?x=1").unwrap();
        assert_eq!(request_uri(&url), "/a/b?x=1");
        let url = Url::parse("https://example.com/a/b").unwrap();
        assert_eq!(request_uri(&url), "/a/b");
    }
}
