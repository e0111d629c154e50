// src/utils/http.rs

//! HTTP client utilities.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::ACCEPT;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;

/// A fetched page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects
    pub url: Url,
    pub body: String,
}

/// Anything that can fetch a page by URL.
///
/// Discovery and scraping only talk to the network through this trait.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page>;
}

/// Polite reqwest-backed fetcher.
///
/// Requests made through one fetcher are spaced at least `request_delay_ms`
/// apart.
pub struct HttpFetcher {
    client: Client,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Self::builder(config, "", None)
    }

    /// Build with an optional per-site user agent and cookie jar.
    pub fn builder(config: &CrawlerConfig, user_agent: &str, jar: Option<Arc<Jar>>) -> Result<Self> {
        let client = create_async_client(config, user_agent, jar)?;
        Ok(Self {
            client,
            delay: Duration::from_millis(config.request_delay_ms),
            last_request: Mutex::new(None),
        })
    }

    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let next = prev + self.delay;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page> {
        self.wait_turn().await;

        let resp = self
            .client
            .get(url.clone())
            .header(ACCEPT, "*/*")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = resp.url().clone();
        let body = resp.text().await?;
        Ok(Page {
            url: final_url,
            body,
        })
    }
}

/// Create a configured asynchronous HTTP client.
///
/// A non-empty `user_agent` overrides the configured one.
pub fn create_async_client(
    config: &CrawlerConfig,
    user_agent: &str,
    jar: Option<Arc<Jar>>,
) -> Result<Client> {
    let user_agent = if user_agent.trim().is_empty() {
        config.user_agent.as_str()
    } else {
        user_agent
    };

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(config.timeout_secs));
    if let Some(jar) = jar {
        builder = builder.cookie_provider(jar);
    }
    Ok(builder.build()?)
}

/// Load a Netscape-format cookies.txt into a new jar.
pub fn load_cookie_file(path: impl AsRef<Path>) -> Result<Jar> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_cookie_file(&content)
}

fn parse_cookie_file(content: &str) -> Result<Jar> {
    let jar = Jar::default();

    for (lineno, line) in content.lines().enumerate() {
        // curl marks HttpOnly cookies with this prefix
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            return Err(AppError::config(format!(
                "cookie file line {}: expected 7 tab-separated fields, got {}",
                lineno + 1,
                fields.len()
            )));
        }
        let (domain, path, secure, name, value) =
            (fields[0], fields[2], fields[3], fields[5], fields[6]);

        let host = domain.trim_start_matches('.');
        let scheme = if secure.eq_ignore_ascii_case("TRUE") {
            "https"
        } else {
            "http"
        };
        let url = Url::parse(&format!("{scheme}://{host}{path}"))?;

        let mut cookie = format!("{name}={value}; Path={path}");
        if domain.starts_with('.') {
            cookie.push_str(&format!("; Domain={host}"));
        }
        if scheme == "https" {
            cookie.push_str("; Secure");
        }
        jar.add_cookie_str(&cookie, &url);
    }

    Ok(jar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CrawlerConfig {
        CrawlerConfig {
            request_delay_ms: 0,
            ..CrawlerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .and(header("accept", "*/*"))
            .and(header("user-agent", "testbot/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::builder(&test_config(), "testbot/1.0", None).unwrap();
        let url = Url::parse(&format!("{}/news", server.uri())).unwrap();
        let page = fetcher.fetch(&url).await.unwrap();
        assert_eq!(page.body, "<html>hi</html>");
        assert_eq!(page.url, url);
    }

    #[tokio::test]
    async fn test_fetch_non_2xx_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_requests_are_spaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = CrawlerConfig {
            request_delay_ms: 100,
            ..CrawlerConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let url = Url::parse(&server.uri()).unwrap();

        let start = std::time::Instant::now();
        for _ in 0..3 {
            fetcher.fetch(&url).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_parse_cookie_file() {
        let content = "# Netscape HTTP Cookie File\n\
                       .example.com\tTRUE\t/\tTRUE\t0\tsession\tabc123\n\
                       #HttpOnly_www.example.com\tFALSE\t/\tFALSE\t0\tuid\t42\n";
        let jar = parse_cookie_file(content).unwrap();

        let url = Url::parse("https://www.example.com/news").unwrap();
        let header = jar.cookies(&url).unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("session=abc123"));
    }

    #[test]
    fn test_parse_cookie_file_rejects_bad_line() {
        assert!(parse_cookie_file("example.com\tTRUE\t/\n").is_err());
    }
}
