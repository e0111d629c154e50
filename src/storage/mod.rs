//! Article persistence.
//!
//! The [`Store`] trait is the only way the rest of the crate touches
//! storage. [`SqlStore`] is the real backend (SQLite or Postgres through
//! sqlx's `Any` driver); [`MemoryStore`] keeps everything in a map and backs
//! unit tests.
//!
//! ## Streaming
//!
//! `fetch` returns an [`ArticleStream`] fed by a producer task over a bounded
//! channel. Dropping the stream cancels the producer, so a consumer that
//! goes away (e.g. an HTTP client disconnecting) stops the database work
//! promptly.

pub mod memory;
pub mod query;
pub mod schema;
pub mod sql;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::Result;
use crate::models::{Article, DatePubCount, Filter, Publication};

// Re-export for convenience
pub use memory::MemoryStore;
pub use sql::SqlStore;

/// Depth of the channel between a fetch producer and its consumer.
pub const STREAM_BUFFER: usize = 32;

/// Which timestamp the summary buckets articles by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryGroup {
    #[default]
    Published,
    Added,
}

impl SummaryGroup {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Published => "a.published",
            Self::Added => "a.added",
        }
    }
}

/// Trait for article storage backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// The subset of `urls` not attached to any stored article, in input order.
    async fn which_are_new(&self, urls: &[String]) -> Result<Vec<String>>;

    /// Ids of the distinct articles that own any of `urls`.
    async fn find_urls(&self, urls: &[String]) -> Result<Vec<i64>>;

    /// Insert (`id == 0`) or fully replace an article. Returns its id.
    async fn stash(&self, article: &Article) -> Result<i64>;

    /// Number of articles matching the filter, ignoring `count`.
    async fn fetch_count(&self, filter: &Filter) -> Result<i64>;

    /// Stream matching articles in ascending id order.
    ///
    /// At most one `Err` is yielded, after which the stream ends. Once
    /// `cancel` fires nothing more is yielded, buffered items included.
    fn fetch(&self, filter: &Filter, cancel: &CancellationToken) -> ArticleStream;

    async fn fetch_article(&self, id: i64) -> Result<Option<Article>>;

    /// All publications, ordered by code.
    async fn fetch_publications(&self) -> Result<Vec<Publication>>;

    /// Per-day, per-publication counts ordered by day then code.
    async fn fetch_summary(&self, filter: &Filter, group: SummaryGroup)
    -> Result<Vec<DatePubCount>>;
}

/// Articles streamed from a [`Store`].
pub struct ArticleStream {
    rx: mpsc::Receiver<Result<Article>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl ArticleStream {
    /// Run `producer` on its own task, feeding the returned stream.
    ///
    /// The producer's token is a child of `cancel` and is also cancelled
    /// when the stream is dropped.
    pub fn spawn<F, Fut>(cancel: &CancellationToken, producer: F) -> Self
    where
        F: FnOnce(ArticleSender) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = cancel.child_token();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let sender = ArticleSender {
            tx,
            cancel: token.clone(),
        };
        tokio::spawn(producer(sender));
        Self {
            rx,
            cancel: token.clone(),
            _guard: token.drop_guard(),
        }
    }
}

impl Stream for ArticleStream {
    type Item = Result<Article>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

/// Producer half of an [`ArticleStream`].
pub struct ArticleSender {
    tx: mpsc::Sender<Result<Article>>,
    cancel: CancellationToken,
}

impl ArticleSender {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Send one item. Returns false when the consumer is gone or cancelled.
    pub async fn send(&self, item: Result<Article>) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            r = self.tx.send(item) => r.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_stream_yields_in_order() {
        let cancel = CancellationToken::new();
        let stream = ArticleStream::spawn(&cancel, |tx| async move {
            for id in 1..=3 {
                let art = Article {
                    id,
                    ..Article::default()
                };
                if !tx.send(Ok(art)).await {
                    return;
                }
            }
        });
        let ids: Vec<i64> = stream.map(|r| r.unwrap().id).collect().await;
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_producer() {
        let cancel = CancellationToken::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let sent_in_task = Arc::clone(&sent);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let mut stream = ArticleStream::spawn(&cancel, |tx| async move {
            loop {
                if !tx.send(Ok(Article::default())).await {
                    break;
                }
                sent_in_task.fetch_add(1, Ordering::SeqCst);
            }
            let _ = done_tx.send(tx.token().is_cancelled());
        });

        assert!(stream.next().await.is_some());
        drop(stream);

        // producer notices and exits
        assert!(done_rx.await.unwrap());
        assert!(sent.load(Ordering::SeqCst) <= STREAM_BUFFER + 1);
        // dropping one stream never cancels the caller's token
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_drops_buffered_items() {
        let cancel = CancellationToken::new();
        let (filled_tx, filled_rx) = tokio::sync::oneshot::channel();
        let mut stream = ArticleStream::spawn(&cancel, |tx| async move {
            for id in 1..=4 {
                tx.send(Ok(Article {
                    id,
                    ..Article::default()
                }))
                .await;
            }
            let _ = filled_tx.send(());
            tx.token().cancelled().await;
        });

        filled_rx.await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().id, 1);
        cancel.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_producer() {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let _stream = ArticleStream::spawn(&cancel, |tx| async move {
            tx.token().cancelled().await;
            let _ = done_tx.send(tx.is_cancelled());
        });
        cancel.cancel();
        assert!(done_rx.await.unwrap());
    }
}
