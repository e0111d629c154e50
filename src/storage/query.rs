//! SQL dialect handling and filter-to-SQL translation.
//!
//! Statements are written once with `?` placeholders. Postgres needs `$N`,
//! so they are rebound right before execution.

use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

use crate::error::{AppError, Result};
use crate::models::{Filter, format_stored_time};

/// Supported database flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Pick the dialect from a connection URL's scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split_once(':').map(|(s, _)| s).unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(AppError::config(format!(
                "unsupported database scheme '{other}' (want sqlite or postgres)"
            ))),
        }
    }

    /// Rewrite `?` placeholders for this dialect.
    ///
    /// Question marks inside single-quoted literals are left alone.
    pub fn rebind(&self, sql: &str) -> String {
        if *self == Self::Sqlite {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len() + 16);
        let mut n = 0;
        let mut in_literal = false;
        for c in sql.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                '?' if !in_literal => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            }
        }
        out
    }
}

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Bind a list of params onto a query, in order.
pub fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, Any, AnyArguments<'q>> {
    for p in params {
        query = match p {
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// `?, ?, ?` for an IN list.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// WHERE-clause fragments built from a filter.
///
/// Assumes the article table is aliased `a` and publication `p`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frags {
    clauses: Vec<String>,
    pub params: Vec<SqlParam>,
}

impl Frags {
    pub fn from_filter(filter: &Filter) -> Self {
        let mut frags = Self::default();

        let ranges = [
            ("a.published>=?", &filter.pub_from),
            ("a.published<?", &filter.pub_to),
            ("a.added>=?", &filter.added_from),
            ("a.added<?", &filter.added_to),
        ];
        for (clause, bound) in ranges {
            if let Some(t) = bound {
                frags.add(clause, vec![format_stored_time(t).into()]);
            }
        }

        if let Some(since) = filter.since_id {
            frags.add("a.id>?", vec![since.into()]);
        }
        if !filter.pub_codes.is_empty() {
            frags.add(
                format!("p.code IN ({})", placeholders(filter.pub_codes.len())),
                filter.pub_codes.iter().map(|c| c.as_str().into()).collect(),
            );
        }
        if !filter.xpub_codes.is_empty() {
            frags.add(
                format!("p.code NOT IN ({})", placeholders(filter.xpub_codes.len())),
                filter.xpub_codes.iter().map(|c| c.as_str().into()).collect(),
            );
        }

        frags
    }

    /// AND in one more condition.
    pub fn add(&mut self, clause: impl Into<String>, params: Vec<SqlParam>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    /// `WHERE a AND b ...`, or empty when there are no conditions.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}
