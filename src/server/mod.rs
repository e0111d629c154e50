// src/server/mod.rs

//! HTTP API for pulling stored articles back out.
//!
//! `/api/slurp` streams newline-delimited JSON messages, one per line:
//!
//! ```text
//! {"article": {...}}
//! {"error": "fetch error: ..."}
//! {"next": {"since_id": 1234}}
//! ```
//!
//! `next` is only sent when the page was full, so a client keeps asking with
//! the returned `since_id` until it gets a short page.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_stream::stream;
use axum::body::Body;
use axum::extract::{ConnectInfo, FromRequestParts, RawQuery, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Article, Filter, ServerConfig};
use crate::storage::{ArticleStream, Store, SummaryGroup};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    max_count: usize,
    /// Cancels in-flight fetches on shutdown
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, max_count: usize, shutdown: CancellationToken) -> Self {
        Self {
            store,
            max_count,
            shutdown,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.to_string()).into_response()
    }
}

/// Peer address when the server was started with connect info, "-" otherwise.
struct RemoteAddr(String);

impl<S: Send + Sync> FromRequestParts<S> for RemoteAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        Ok(Self(addr))
    }
}

/// Build the API router, with every route under `prefix`.
pub fn router(state: AppState, prefix: &str) -> Router {
    let prefix = prefix.trim_end_matches('/');
    Router::new()
        .route(&format!("{prefix}/api/slurp"), get(slurp))
        .route(&format!("{prefix}/api/count"), get(count))
        .route(&format!("{prefix}/api/pubs"), get(pubs))
        .route(&format!("{prefix}/api/summary"), get(summary))
        .with_state(state)
}

/// Serve until `cancel` fires, then shut down gracefully.
pub async fn serve(config: &ServerConfig, store: Arc<dyn Store>, cancel: CancellationToken) -> Result<()> {
    let state = AppState::new(store, config.max_count, cancel.clone());
    let app = router(state, &config.prefix);

    let listener = TcpListener::bind(&config.bind).await?;
    log::info!(
        "Serving on {}{}/api",
        listener.local_addr()?,
        config.prefix.trim_end_matches('/')
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await?;

    log::info!("Server stopped");
    Ok(())
}

fn parse_filter(query: Option<String>, max_count: usize) -> Result<Filter> {
    let query = query.unwrap_or_default();
    Filter::from_query(url::form_urlencoded::parse(query.as_bytes()), max_count)
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Msg<'a> {
    Article(&'a Article),
    Error(String),
    Next { since_id: i64 },
}

fn encode(msg: &Msg<'_>) -> Vec<u8> {
    let mut line = serde_json::to_vec(msg).unwrap_or_else(|e| {
        log::error!("json encoding error: {}", e);
        br#"{"error":"json encoding error"}"#.to_vec()
    });
    line.push(b'\n');
    line
}

/// Logs one slurp request when its body finishes or is dropped mid-stream.
struct SlurpLog {
    remote: String,
    filter: String,
    articles: usize,
    bytes: usize,
    finished: bool,
    #[cfg(test)]
    report: Option<std::sync::mpsc::Sender<String>>,
}

impl SlurpLog {
    fn new(remote: String, filter: String) -> Self {
        Self {
            remote,
            filter,
            articles: 0,
            bytes: 0,
            finished: false,
            #[cfg(test)]
            report: None,
        }
    }

    fn line(&self) -> String {
        let status = if self.finished { "OK" } else { "ABORTED" };
        format!(
            "{} {} {} arts {} bytes {}",
            self.remote, status, self.articles, self.bytes, self.filter
        )
    }
}

impl Drop for SlurpLog {
    fn drop(&mut self) {
        let line = self.line();
        log::info!("{}", line);
        #[cfg(test)]
        if let Some(tx) = self.report.take() {
            let _ = tx.send(line);
        }
    }
}

async fn slurp(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
    RawQuery(query): RawQuery,
) -> Response {
    let filter = match parse_filter(query, state.max_count) {
        Ok(filter) => filter,
        Err(e) => {
            log::info!("{} /api/slurp bad params: {}", remote, e);
            return e.into_response();
        }
    };

    let articles = state.store.fetch(&filter, &state.shutdown);
    let tally = SlurpLog::new(remote, filter.describe());

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(slurp_body(articles, filter.count, tally)),
    )
        .into_response()
}

/// NDJSON lines for one slurp page. `tally` lives as long as the body does.
fn slurp_body(
    mut articles: ArticleStream,
    page_size: Option<usize>,
    tally: SlurpLog,
) -> impl Stream<Item = std::result::Result<Vec<u8>, Infallible>> + Send + 'static {
    stream! {
        let mut tally = tally;
        let mut max_id = 0;
        while let Some(item) = articles.next().await {
            let line = match item {
                Ok(art) => {
                    tally.articles += 1;
                    max_id = max_id.max(art.id);
                    encode(&Msg::Article(&art))
                }
                Err(e) => {
                    log::error!("fetch error: {}", e);
                    encode(&Msg::Error(format!("fetch error: {e}")))
                }
            };
            tally.bytes += line.len();
            yield Ok::<_, Infallible>(line);
        }

        // a full page means there may be more
        if tally.articles > 0 && page_size == Some(tally.articles) {
            let line = encode(&Msg::Next { since_id: max_id });
            tally.bytes += line.len();
            yield Ok(line);
        }
        tally.finished = true;
    }
}

async fn count(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>> {
    let filter = parse_filter(query, state.max_count)?;
    let n = state.store.fetch_count(&filter).await.inspect_err(|e| {
        log::error!("/api/count DB error: {}", e);
    })?;
    log::info!("{} count {} {}", remote, n, filter.describe());
    Ok(Json(json!({ "article_count": n })))
}

async fn pubs(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
) -> Result<Json<serde_json::Value>> {
    let publications = state.store.fetch_publications().await.inspect_err(|e| {
        log::error!("/api/pubs DB error: {}", e);
    })?;
    log::info!("{} publications ({})", remote, publications.len());
    Ok(Json(json!({ "publications": publications })))
}

async fn summary(
    State(state): State<AppState>,
    RemoteAddr(remote): RemoteAddr,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>> {
    let filter = parse_filter(query, state.max_count)?;
    let rows = state
        .store
        .fetch_summary(&filter, SummaryGroup::Published)
        .await
        .inspect_err(|e| log::error!("/api/summary DB error: {}", e))?;

    let mut counts: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    for row in &rows {
        counts
            .entry(row.pub_code.clone())
            .or_default()
            .insert(row.day.clone(), row.count);
    }

    log::info!("{} summary ({} rows)", remote, rows.len());
    Ok(Json(json!({ "counts": counts })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Publication;
    use crate::storage::MemoryStore;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn seeded(n: usize) -> Arc<dyn Store> {
        let store = MemoryStore::new();
        for i in 0..n {
            let code = if i % 2 == 0 { "blah" } else { "grind" };
            let art = Article {
                urls: vec![format!("https://{code}.com/{i}")],
                headline: format!("story {i}"),
                published: format!("2019-04-0{}", 1 + i % 3),
                publication: Publication {
                    code: code.to_string(),
                    ..Publication::default()
                },
                ..Article::default()
            };
            store.stash(&art).await.unwrap();
        }
        Arc::new(store)
    }

    fn app(store: Arc<dyn Store>, prefix: &str) -> Router {
        router(AppState::new(store, 100, CancellationToken::new()), prefix)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn lines(body: &str) -> Vec<serde_json::Value> {
        body.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_slurp_full_page_sends_next() {
        let (status, body) = get_body(app(seeded(5).await, ""), "/api/slurp?count=2").await;
        assert_eq!(status, StatusCode::OK);
        let msgs = lines(&body);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["article"]["id"], 1);
        assert_eq!(msgs[1]["article"]["id"], 2);
        assert_eq!(msgs[2]["next"]["since_id"], 2);

        // following the cursor picks up where the last page left off
        let (_, body) = get_body(app(seeded(5).await, ""), "/api/slurp?count=2&since_id=2").await;
        let msgs = lines(&body);
        assert_eq!(msgs[0]["article"]["id"], 3);
        assert_eq!(msgs[2]["next"]["since_id"], 4);
    }

    #[tokio::test]
    async fn test_slurp_short_page_has_no_next() {
        let (status, body) = get_body(app(seeded(3).await, ""), "/api/slurp?pub=blah").await;
        assert_eq!(status, StatusCode::OK);
        let msgs = lines(&body);
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.get("next").is_none()));
        assert_eq!(msgs[0]["article"]["publication"]["code"], "blah");
    }

    #[tokio::test]
    async fn test_bad_params_are_400() {
        let store = seeded(1).await;
        let (status, body) = get_body(app(store.clone(), ""), "/api/slurp?count=1000").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("count"));

        let (status, _) = get_body(app(store.clone(), ""), "/api/count?pubfrom=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // a zero page size would never advance the cursor
        let (status, body) = get_body(app(store, ""), "/api/slurp?count=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.contains("next"));
    }

    #[tokio::test]
    async fn test_slurp_empty_page_has_no_next() {
        let (status, body) =
            get_body(app(seeded(2).await, ""), "/api/slurp?count=2&since_id=2").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    fn reporting_tally(filter: &Filter) -> (SlurpLog, std::sync::mpsc::Receiver<String>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut tally = SlurpLog::new("1.2.3.4:5".to_string(), filter.describe());
        tally.report = Some(tx);
        (tally, rx)
    }

    #[tokio::test]
    async fn test_slurp_log_reports_finished_body() {
        let store = seeded(3).await;
        let filter = Filter {
            count: Some(2),
            ..Filter::default()
        };
        let (tally, report) = reporting_tally(&filter);
        let articles = store.fetch(&filter, &CancellationToken::new());

        let body = slurp_body(articles, filter.count, tally);
        // the request log is only written once the body is done
        assert!(report.try_recv().is_err());
        let chunks: Vec<_> = body.collect().await;
        assert_eq!(chunks.len(), 3);

        let line = report.try_recv().unwrap();
        assert!(line.starts_with("1.2.3.4:5 OK 2 arts "), "{line}");
    }

    #[tokio::test]
    async fn test_slurp_log_reports_dropped_body() {
        let store = seeded(3).await;
        let filter = Filter::default();
        let (tally, report) = reporting_tally(&filter);
        let articles = store.fetch(&filter, &CancellationToken::new());

        let mut body = Box::pin(slurp_body(articles, filter.count, tally));
        assert!(body.next().await.is_some());
        drop(body);

        let line = report.try_recv().unwrap();
        assert!(line.starts_with("1.2.3.4:5 ABORTED 1 arts "), "{line}");
    }

    #[tokio::test]
    async fn test_count_pubs_and_summary() {
        let store = seeded(4).await;

        let (status, body) = get_body(app(store.clone(), "/news"), "/news/api/count?xpub=grind").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["article_count"], 2);

        let (_, body) = get_body(app(store.clone(), "/news"), "/news/api/pubs").await;
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        let codes: Vec<&str> = v["publications"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["blah", "grind"]);

        let (_, body) = get_body(app(store, "/news"), "/news/api/summary").await;
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["counts"]["blah"]["2019-04-01"], 1);
        assert_eq!(v["counts"]["blah"]["2019-04-03"], 1);
        assert_eq!(v["counts"]["grind"]["2019-04-02"], 1);
    }

    #[tokio::test]
    async fn test_routes_respect_prefix() {
        let (status, _) = get_body(app(seeded(1).await, "/news/"), "/api/count").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
