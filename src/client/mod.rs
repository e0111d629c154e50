// src/client/mod.rs

//! Client for the HTTP API of a running newshound server.
//!
//! [`SlurpClient::slurp_all`] pages through `/api/slurp`, handing each
//! article to a callback as its line arrives and following the server's
//! `next` cursor until a page comes back short.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Article, Filter, Publication};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One line of a slurp response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Msg {
    Article(Box<Article>),
    Error(String),
    Next { since_id: i64 },
}

/// How one slurp page ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub articles: usize,
    /// Error messages the server sent in-band
    pub errors: Vec<String>,
    /// Cursor for the following page, if the server sent one
    pub next: Option<i64>,
}

/// Totals over a whole `slurp_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlurpStats {
    pub pages: usize,
    pub articles: usize,
    pub errors: Vec<String>,
}

pub struct SlurpClient {
    http: Client,
    base: Url,
}

impl SlurpClient {
    /// `base` is the server root, including any path prefix
    /// (e.g. `http://localhost:12345/news`).
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AppError::config(format!("not an http(s) server URL: {base}")));
        }
        let http = Client::builder()
            .user_agent(concat!("newshound/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str, filter: Option<&Filter>) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{}{}", self.base.path().trim_end_matches('/'), path));
        let query = filter.map(Filter::to_query_string).unwrap_or_default();
        url.set_query((!query.is_empty()).then_some(query.as_str()));
        url
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            log::warn!("{} answered {}: {}", url, status, body.trim());
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    /// Fetch one page, passing articles to `on_article` as they arrive.
    pub async fn slurp_page<F>(&self, filter: &Filter, on_article: &mut F) -> Result<PageSummary>
    where
        F: FnMut(Article) -> Result<()>,
    {
        let url = self.endpoint("/api/slurp", Some(filter));
        log::debug!("GET {}", url);
        let mut body = self.get(url).await?.bytes_stream();

        let mut page = PageSummary::default();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
            while let Some(end) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=end).collect();
                read_line(&line, &mut page, on_article)?;
            }
        }
        // last line may lack its newline
        read_line(&buf, &mut page, on_article)?;
        Ok(page)
    }

    /// Fetch every page matching `filter`, starting after `filter.since_id`.
    ///
    /// Stops after a page without a usable `next` cursor, or after a page
    /// that carried an error message.
    pub async fn slurp_all<F>(
        &self,
        filter: &Filter,
        cancel: &CancellationToken,
        mut on_article: F,
    ) -> Result<SlurpStats>
    where
        F: FnMut(Article) -> Result<()>,
    {
        let mut filter = filter.clone();
        let mut stats = SlurpStats::default();

        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                r = self.slurp_page(&filter, &mut on_article) => r?,
            };
            stats.pages += 1;
            stats.articles += page.articles;
            let failed = !page.errors.is_empty();
            stats.errors.extend(page.errors);

            let last = filter.since_id.unwrap_or(0);
            match page.next {
                Some(id) if !failed && page.articles > 0 && id > last => {
                    filter.since_id = Some(id);
                }
                _ => break,
            }
        }

        log::info!(
            "Slurped {} articles in {} pages from {}",
            stats.articles,
            stats.pages,
            self.base
        );
        Ok(stats)
    }

    /// Number of articles matching `filter`.
    pub async fn count(&self, filter: &Filter) -> Result<i64> {
        #[derive(Deserialize)]
        struct Reply {
            article_count: i64,
        }
        let reply: Reply = self
            .get(self.endpoint("/api/count", Some(filter)))
            .await?
            .json()
            .await?;
        Ok(reply.article_count)
    }

    pub async fn publications(&self) -> Result<Vec<Publication>> {
        #[derive(Deserialize)]
        struct Reply {
            publications: Vec<Publication>,
        }
        let reply: Reply = self.get(self.endpoint("/api/pubs", None)).await?.json().await?;
        Ok(reply.publications)
    }
}

fn read_line<F>(line: &[u8], page: &mut PageSummary, on_article: &mut F) -> Result<()>
where
    F: FnMut(Article) -> Result<()>,
{
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(());
    }
    match serde_json::from_slice::<Msg>(line)? {
        Msg::Article(art) => {
            page.articles += 1;
            on_article(*art)?;
        }
        Msg::Error(e) => {
            log::warn!("server error: {}", e);
            page.errors.push(e);
        }
        Msg::Next { since_id } => page.next = Some(since_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AppState, router};
    use crate::storage::{MemoryStore, Store};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serve `n` articles from a memory store under `/news`.
    async fn serve_articles(n: usize) -> (String, CancellationToken) {
        let store = MemoryStore::new();
        for i in 0..n {
            let code = if i % 2 == 0 { "blah" } else { "grind" };
            let mut art = Article::with_url(format!("https://{code}.com/{i}"));
            art.headline = format!("story {i}");
            art.publication.code = code.to_string();
            store.stash(&art).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let app = router(
            AppState::new(Arc::new(store), 100, shutdown.clone()),
            "/news",
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
                .unwrap();
        });
        (format!("http://{addr}/news/"), shutdown)
    }

    #[tokio::test]
    async fn test_slurp_all_follows_next_cursor() {
        let (base, shutdown) = serve_articles(5).await;
        let client = SlurpClient::new(&base).unwrap();
        let filter = Filter {
            count: Some(2),
            ..Filter::default()
        };

        let mut ids = Vec::new();
        let stats = client
            .slurp_all(&filter, &CancellationToken::new(), |art| {
                ids.push(art.id);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(stats.pages, 3);
        assert_eq!(stats.articles, 5);
        assert!(stats.errors.is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_on_empty_page() {
        let (base, shutdown) = serve_articles(4).await;
        let client = SlurpClient::new(&base).unwrap();
        let filter = Filter {
            pub_codes: vec!["blah".to_string()],
            count: Some(2),
            ..Filter::default()
        };

        let mut headlines = Vec::new();
        let stats = client
            .slurp_all(&filter, &CancellationToken::new(), |art| {
                headlines.push(art.headline);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(headlines, vec!["story 0", "story 2"]);
        // full first page, then an empty one without a cursor
        assert_eq!(stats.pages, 2);

        assert_eq!(client.count(&filter).await.unwrap(), 2);
        let codes: Vec<String> = client
            .publications()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.code)
            .collect();
        assert_eq!(codes, vec!["blah", "grind"]);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_rejected_filter_is_http_error() {
        let (base, shutdown) = serve_articles(1).await;
        let client = SlurpClient::new(&base).unwrap();
        let filter = Filter {
            count: Some(1000),
            ..Filter::default()
        };
        let result = client
            .slurp_all(&filter, &CancellationToken::new(), |_| Ok(()))
            .await;
        assert!(matches!(result, Err(AppError::HttpStatus { status: 400, .. })));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_in_band_error_stops_paging() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"article\":{\"id\":7,\"urls\":[\"https://blah.com/7\"]}}\n",
            "{\"error\":\"fetch error: disk on fire\"}\n",
            "{\"next\":{\"since_id\":7}}",
        );
        Mock::given(method("GET"))
            .and(path("/api/slurp"))
            .and(query_param("count", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(2)
            .mount(&server)
            .await;

        let client = SlurpClient::new(&server.uri()).unwrap();
        let filter = Filter {
            count: Some(1),
            ..Filter::default()
        };

        let mut page_seen = Vec::new();
        let page = client
            .slurp_page(&filter, &mut |art: Article| {
                page_seen.push(art.id);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(page_seen, vec![7]);
        assert_eq!(page.next, Some(7));
        assert_eq!(page.errors, vec!["fetch error: disk on fire"]);

        let stats = client
            .slurp_all(&filter, &CancellationToken::new(), |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_slurp() {
        let server = MockServer::start().await;
        let client = SlurpClient::new(&server.uri()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client
            .slurp_all(&Filter::default(), &cancel, |_| Ok(()))
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[test]
    fn test_endpoint_keeps_prefix_and_encodes_filter() {
        let client = SlurpClient::new("http://localhost:12345/news/").unwrap();
        let filter = Filter {
            pub_codes: vec!["blah".to_string()],
            since_id: Some(42),
            ..Filter::default()
        };
        let url = client.endpoint("/api/slurp", Some(&filter));
        assert_eq!(url.path(), "/news/api/slurp");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("pub".to_string(), "blah".to_string())));
        assert!(pairs.contains(&("since_id".to_string(), "42".to_string())));

        assert_eq!(
            client.endpoint("/api/pubs", None).as_str(),
            "http://localhost:12345/news/api/pubs"
        );
        assert!(SlurpClient::new("ftp://example.com/").is_err());
    }
}
