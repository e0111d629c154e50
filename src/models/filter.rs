// src/models/filter.rs

//! Declarative article selection and its query-string encoding.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Timelike, Utc};

use crate::error::{AppError, Result};

const DAY_LAYOUT: &str = "%Y-%m-%d";

/// Selects a page of articles.
///
/// Time ranges are half-open: `from <= t < to`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub pub_from: Option<DateTime<Utc>>,
    pub pub_to: Option<DateTime<Utc>>,
    pub added_from: Option<DateTime<Utc>>,
    pub added_to: Option<DateTime<Utc>>,

    /// Only these publications (empty = all)
    pub pub_codes: Vec<String>,
    /// Never these publications
    pub xpub_codes: Vec<String>,

    /// Only articles with id strictly greater than this
    pub since_id: Option<i64>,
    /// Maximum number of articles to return
    pub count: Option<usize>,
}

impl Filter {
    /// Decode a filter from query-string pairs.
    ///
    /// `count` defaults to `max_count` and must lie in `1..=max_count`.
    pub fn from_query<I, K, V>(pairs: I, max_count: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut single: HashMap<String, String> = HashMap::new();
        let mut filt = Filter::default();

        for (k, v) in pairs {
            let (k, v) = (k.as_ref(), v.as_ref());
            match k {
                "pub" if !v.is_empty() => filt.pub_codes.push(v.to_string()),
                "xpub" if !v.is_empty() => filt.xpub_codes.push(v.to_string()),
                _ => {
                    single.insert(k.to_string(), v.to_string());
                }
            }
        }
        let value = |name: &str| single.get(name).map(String::as_str).filter(|v| !v.is_empty());

        // "from" and "to" are deprecated; "to" is inclusive of its whole day
        if let Some(v) = value("from") {
            filt.pub_from = Some(parse_time("from", v)?);
        }
        if let Some(v) = value("to") {
            filt.pub_to = Some(parse_time("to", v)? + Duration::days(1));
        }

        if let Some(v) = value("pubfrom") {
            filt.pub_from = Some(parse_time("pubfrom", v)?);
        }
        if let Some(v) = value("pubto") {
            filt.pub_to = Some(parse_time("pubto", v)?);
        }
        if let Some(v) = value("addedfrom") {
            filt.added_from = Some(parse_time("addedfrom", v)?);
        }
        if let Some(v) = value("addedto") {
            filt.added_to = Some(parse_time("addedto", v)?);
        }

        if let Some(v) = value("since_id") {
            let since: i64 = v
                .parse()
                .map_err(|_| AppError::bad_param("since_id", "not an integer"))?;
            if since > 0 {
                filt.since_id = Some(since);
            }
        }

        let count = match value("count") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| AppError::bad_param("count", "not a positive integer"))?,
            None => max_count,
        };
        if count == 0 {
            return Err(AppError::bad_param("count", "must be at least 1"));
        }
        if count > max_count {
            return Err(AppError::bad_param(
                "count",
                format!("too high (max {max_count})"),
            ));
        }
        filt.count = Some(count);

        Ok(filt)
    }

    /// Encode as query-string pairs that `from_query` decodes to an equal filter.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        let times = [
            ("pubfrom", &self.pub_from),
            ("pubto", &self.pub_to),
            ("addedfrom", &self.added_from),
            ("addedto", &self.added_to),
        ];
        for (name, t) in times {
            if let Some(t) = t {
                out.push((name, format_time(t)));
            }
        }
        if let Some(since) = self.since_id {
            out.push(("since_id", since.to_string()));
        }
        if let Some(count) = self.count {
            out.push(("count", count.to_string()));
        }
        out.extend(self.pub_codes.iter().map(|c| ("pub", c.clone())));
        out.extend(self.xpub_codes.iter().map(|c| ("xpub", c.clone())));
        out
    }

    /// Encode as a query string (without leading '?').
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.to_query_pairs())
            .finish()
    }

    /// Concise one-line description for logs.
    pub fn describe(&self) -> String {
        let mut s = String::from("[ ");

        push_range(&mut s, "pub", &self.pub_from, &self.pub_to);
        push_range(&mut s, "added", &self.added_from, &self.added_to);

        if !self.pub_codes.is_empty() {
            s.push_str(&self.pub_codes.join("|"));
            s.push(' ');
        }
        if !self.xpub_codes.is_empty() {
            let excluded: Vec<String> = self.xpub_codes.iter().map(|c| format!("!{c}")).collect();
            s.push_str(&excluded.join("|"));
            s.push(' ');
        }
        if let Some(count) = self.count.filter(|c| *c > 0) {
            s.push_str(&format!("cnt {count} "));
        }
        if let Some(since) = self.since_id {
            s.push_str(&format!("since {since} "));
        }

        s.push(']');
        s
    }
}

fn push_range(s: &mut String, label: &str, from: &Option<DateTime<Utc>>, to: &Option<DateTime<Utc>>) {
    let rfc = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
    match (from, to) {
        (Some(f), Some(t)) => s.push_str(&format!("{label} {}..{} ", rfc(f), rfc(t))),
        (Some(f), None) => s.push_str(&format!("{label} {}.. ", rfc(f))),
        (None, Some(t)) => s.push_str(&format!("{label} ..{} ", rfc(t))),
        (None, None) => {}
    }
}

/// Parse `YYYY-MM-DD` (a UTC day) or RFC3339.
fn parse_time(param: &str, v: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(v) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(v, DAY_LAYOUT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| AppError::bad_param(param, "invalid date/time format"))
}

fn format_time(t: &DateTime<Utc>) -> String {
    if t.num_seconds_from_midnight() == 0 && t.nanosecond() == 0 {
        t.format(DAY_LAYOUT).to_string()
    } else {
        t.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
