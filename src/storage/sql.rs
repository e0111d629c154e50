//! SQL storage backend (SQLite or Postgres).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyConnection, AnyPool, Row};
use tokio_util::sync::CancellationToken;

use super::query::{Dialect, Frags, SqlParam, bind_all, placeholders};
use super::schema::ensure_schema;
use super::{ArticleSender, ArticleStream, Store, SummaryGroup};
use crate::error::{AppError, Result};
use crate::models::{
    Article, Author, DatePubCount, Filter, Keyword, Publication, StorageConfig,
    format_stored_time, normalize_timestamp,
};

const ARTICLE_COLUMNS: &str = "a.id, a.canonical_url, a.headline, a.content, a.published, \
     a.updated, a.section, a.extra, p.code, p.name, p.domain";

const ARTICLE_FROM: &str = "FROM article a INNER JOIN publication p ON p.id=a.publication_id";

/// Rows read per main-query round trip while streaming.
const FETCH_BATCH: usize = 100;

/// Store backed by a sqlx `Any` pool.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    /// Connect and create the schema if needed.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let dialect = Dialect::from_url(&config.url)?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections.max(2))
            .connect(&config.url)
            .await?;
        ensure_schema(&pool, dialect).await?;

        log::info!("Connected to {:?} store", dialect);
        Ok(Self { pool, dialect })
    }

    /// Connect with default settings.
    pub async fn open(url: &str) -> Result<Self> {
        Self::connect(&StorageConfig {
            url: url.to_string(),
            ..StorageConfig::default()
        })
        .await
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn sql(&self, sql: &str) -> String {
        self.dialect.rebind(sql)
    }

    async fn find_publication(&self, conn: &mut AnyConnection, publication: &Publication) -> Result<i64> {
        let lookups = [
            ("code", &publication.code),
            ("name", &publication.name),
            ("domain", &publication.domain),
        ];
        for (column, value) in lookups {
            if value.is_empty() {
                continue;
            }
            let sql = self.sql(&format!("SELECT id FROM publication WHERE {column}=? ORDER BY id LIMIT 1"));
            let row = sqlx::query(&sql)
                .bind(value.clone())
                .fetch_optional(&mut *conn)
                .await?;
            if let Some(row) = row {
                return Ok(row.try_get(0)?);
            }
        }

        let sql = self.sql("INSERT INTO publication (code, name, domain) VALUES (?, ?, ?) RETURNING id");
        let row = sqlx::query(&sql)
            .bind(publication.code.clone())
            .bind(publication.name.clone())
            .bind(publication.domain.clone())
            .fetch_one(&mut *conn)
            .await?;
        let id: i64 = row.try_get(0)?;
        log::info!("New publication '{}' (id {})", publication.code, id);
        Ok(id)
    }

    async fn delete_children(&self, conn: &mut AnyConnection, article_id: i64) -> Result<()> {
        let statements = [
            "DELETE FROM article_url WHERE article_id=?",
            "DELETE FROM article_keyword WHERE article_id=?",
            "DELETE FROM author WHERE id IN (SELECT author_id FROM author_attr WHERE article_id=?)",
            "DELETE FROM author_attr WHERE article_id=?",
        ];
        for stmt in statements {
            sqlx::query(&self.sql(stmt))
                .bind(article_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn insert_children(&self, conn: &mut AnyConnection, article_id: i64, art: &Article) -> Result<()> {
        let url_sql = self.sql("INSERT INTO article_url (article_id, url) VALUES (?, ?)");
        for url in &art.urls {
            sqlx::query(&url_sql)
                .bind(article_id)
                .bind(url.clone())
                .execute(&mut *conn)
                .await?;
        }

        let kw_sql = self.sql("INSERT INTO article_keyword (article_id, name, url) VALUES (?, ?, ?)");
        for kw in &art.keywords {
            sqlx::query(&kw_sql)
                .bind(article_id)
                .bind(kw.name.clone())
                .bind(kw.url.clone())
                .execute(&mut *conn)
                .await?;
        }

        let author_sql = self.sql(
            "INSERT INTO author (name, rel_link, email, twitter) VALUES (?, ?, ?, ?) RETURNING id",
        );
        let attr_sql = self.sql("INSERT INTO author_attr (author_id, article_id) VALUES (?, ?)");
        for author in &art.authors {
            let row = sqlx::query(&author_sql)
                .bind(author.name.clone())
                .bind(author.rel_link.clone())
                .bind(author.email.clone())
                .bind(author.twitter.clone())
                .fetch_one(&mut *conn)
                .await?;
            let author_id: i64 = row.try_get(0)?;
            sqlx::query(&attr_sql)
                .bind(author_id)
                .bind(article_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn count_where(&self, frags: &Frags) -> Result<i64> {
        let sql = self.sql(&format!("SELECT COUNT(*) {ARTICLE_FROM} {}", frags.where_sql()));
        let row = bind_all(sqlx::query(&sql), &frags.params)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn which_are_new(&self, urls: &[String]) -> Result<Vec<String>> {
        let sql = self.sql("SELECT article_id FROM article_url WHERE url=? LIMIT 1");
        let mut fresh = Vec::new();
        for url in urls {
            let hit = sqlx::query(&sql)
                .bind(url.clone())
                .fetch_optional(&self.pool)
                .await?;
            if hit.is_none() {
                fresh.push(url.clone());
            }
        }
        Ok(fresh)
    }

    async fn find_urls(&self, urls: &[String]) -> Result<Vec<i64>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let sql = self.sql(&format!(
            "SELECT DISTINCT article_id FROM article_url WHERE url IN ({}) ORDER BY article_id",
            placeholders(urls.len())
        ));
        let params: Vec<SqlParam> = urls.iter().map(|u| u.as_str().into()).collect();
        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>(0).map_err(AppError::from))
            .collect()
    }

    async fn stash(&self, art: &Article) -> Result<i64> {
        art.validate()?;

        let mut tx = self.pool.begin().await?;
        let pub_id = self.find_publication(&mut *tx, &art.publication).await?;

        let added = format_stored_time(&Utc::now());
        let published = normalize_timestamp(&art.published);
        let updated = normalize_timestamp(&art.updated);
        let extra = art.extra.as_ref().map(serde_json::to_string).transpose()?;

        let article_id = if art.id == 0 {
            let sql = self.sql(
                "INSERT INTO article (canonical_url, headline, content, published, updated, \
                 publication_id, section, extra, added) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            );
            let row = sqlx::query(&sql)
                .bind(art.canonical_url.clone())
                .bind(art.headline.clone())
                .bind(art.content.clone())
                .bind(published)
                .bind(updated)
                .bind(pub_id)
                .bind(art.section.clone())
                .bind(extra)
                .bind(added)
                .fetch_one(&mut *tx)
                .await?;
            row.try_get(0)?
        } else {
            let sql = self.sql(
                "UPDATE article SET canonical_url=?, headline=?, content=?, published=?, \
                 updated=?, publication_id=?, section=?, extra=?, added=? WHERE id=?",
            );
            let done = sqlx::query(&sql)
                .bind(art.canonical_url.clone())
                .bind(art.headline.clone())
                .bind(art.content.clone())
                .bind(published)
                .bind(updated)
                .bind(pub_id)
                .bind(art.section.clone())
                .bind(extra)
                .bind(added)
                .bind(art.id)
                .execute(&mut *tx)
                .await?;
            if done.rows_affected() == 0 {
                return Err(AppError::validation(format!("no article with id {}", art.id)));
            }
            self.delete_children(&mut *tx, art.id).await?;
            art.id
        };

        self.insert_children(&mut *tx, article_id, art).await?;
        tx.commit().await?;
        Ok(article_id)
    }

    async fn fetch_count(&self, filter: &Filter) -> Result<i64> {
        self.count_where(&Frags::from_filter(filter)).await
    }

    fn fetch(&self, filter: &Filter, cancel: &CancellationToken) -> ArticleStream {
        let frags = Frags::from_filter(filter);
        let limit = filter.count;
        let store = self.clone();

        ArticleStream::spawn(cancel, move |tx| async move {
            if let Err(e) = store.produce(&frags, limit, &tx).await {
                if !matches!(e, AppError::Cancelled) {
                    log::error!("fetch failed: {}", e);
                    tx.send(Err(e)).await;
                }
            }
        })
    }

    async fn fetch_article(&self, id: i64) -> Result<Option<Article>> {
        let sql = self.sql(&format!("SELECT {ARTICLE_COLUMNS} {ARTICLE_FROM} WHERE a.id=?"));
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut art = article_from_row(&row)?;
                self.fill_children(&mut art).await?;
                Ok(Some(art))
            }
            None => Ok(None),
        }
    }

    async fn fetch_publications(&self) -> Result<Vec<Publication>> {
        let rows = sqlx::query("SELECT code, name, domain FROM publication ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> Result<Publication> {
                Ok(Publication {
                    code: r.try_get(0)?,
                    name: r.try_get(1)?,
                    domain: r.try_get(2)?,
                })
            })
            .collect()
    }

    async fn fetch_summary(&self, filter: &Filter, group: SummaryGroup) -> Result<Vec<DatePubCount>> {
        let frags = Frags::from_filter(filter);
        let sql = self.sql(&format!(
            "SELECT substr({}, 1, 10) AS day, p.code AS code, COUNT(*) AS cnt {ARTICLE_FROM} {} \
             GROUP BY day, p.code ORDER BY day, p.code",
            group.column(),
            frags.where_sql()
        ));
        let rows = bind_all(sqlx::query(&sql), &frags.params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> Result<DatePubCount> {
                Ok(DatePubCount {
                    day: r.try_get(0)?,
                    pub_code: r.try_get(1)?,
                    count: r.try_get(2)?,
                })
            })
            .collect()
    }
}

impl SqlStore {
    /// Body of the fetch producer task.
    ///
    /// The main query is read in id-ordered batches so no connection stays
    /// checked out while child rows are fetched.
    async fn produce(&self, frags: &Frags, limit: Option<usize>, tx: &ArticleSender) -> Result<()> {
        let mut remaining = limit;
        let mut last_id = None;

        loop {
            let batch = remaining.map_or(FETCH_BATCH, |n| n.min(FETCH_BATCH));
            if batch == 0 {
                return Ok(());
            }

            let mut page = frags.clone();
            if let Some(id) = last_id {
                page.add("a.id>?", vec![SqlParam::Int(id)]);
            }
            let sql = self.sql(&format!(
                "SELECT {ARTICLE_COLUMNS} {ARTICLE_FROM} {} ORDER BY a.id LIMIT {batch}",
                page.where_sql()
            ));
            let rows = tokio::select! {
                biased;
                _ = tx.token().cancelled() => return Err(AppError::Cancelled),
                r = bind_all(sqlx::query(&sql), &page.params).fetch_all(&self.pool) => r?,
            };
            let got = rows.len();

            for row in rows {
                if tx.is_cancelled() {
                    return Err(AppError::Cancelled);
                }
                let mut art = article_from_row(&row)?;
                self.fill_children(&mut art).await?;
                last_id = Some(art.id);

                if !tx.send(Ok(art)).await {
                    return Err(AppError::Cancelled);
                }
            }

            if let Some(n) = remaining.as_mut() {
                *n -= got;
            }
            if got < batch {
                return Ok(());
            }
        }
    }

    async fn fill_children(&self, art: &mut Article) -> Result<()> {
        let sql = self.sql("SELECT url FROM article_url WHERE article_id=? ORDER BY id");
        let rows = sqlx::query(&sql).bind(art.id).fetch_all(&self.pool).await?;
        art.urls = rows
            .iter()
            .map(|r| r.try_get::<String, _>(0))
            .collect::<std::result::Result<_, _>>()?;

        let sql = self.sql("SELECT name, url FROM article_keyword WHERE article_id=? ORDER BY id");
        let rows = sqlx::query(&sql).bind(art.id).fetch_all(&self.pool).await?;
        art.keywords = rows
            .iter()
            .map(|r| -> Result<Keyword> {
                Ok(Keyword {
                    name: r.try_get(0)?,
                    url: r.try_get(1)?,
                })
            })
            .collect::<Result<_>>()?;

        let sql = self.sql(
            "SELECT au.name, au.rel_link, au.email, au.twitter FROM author au \
             INNER JOIN author_attr att ON att.author_id=au.id \
             WHERE att.article_id=? ORDER BY att.id",
        );
        let rows = sqlx::query(&sql).bind(art.id).fetch_all(&self.pool).await?;
        art.authors = rows
            .iter()
            .map(|r| -> Result<Author> {
                Ok(Author {
                    name: r.try_get(0)?,
                    rel_link: r.try_get(1)?,
                    email: r.try_get(2)?,
                    twitter: r.try_get(3)?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(())
    }
}

fn article_from_row(row: &AnyRow) -> Result<Article> {
    let extra: Option<String> = row.try_get(7)?;
    let extra = match extra {
        Some(s) if !s.is_empty() => Some(serde_json::from_str(&s)?),
        _ => None,
    };

    Ok(Article {
        id: row.try_get(0)?,
        canonical_url: row.try_get(1)?,
        headline: row.try_get(2)?,
        content: row.try_get(3)?,
        published: row.try_get(4)?,
        updated: row.try_get(5)?,
        section: row.try_get(6)?,
        extra,
        publication: Publication {
            code: row.try_get(8)?,
            name: row.try_get(9)?,
            domain: row.try_get(10)?,
        },
        ..Article::default()
    })
}
