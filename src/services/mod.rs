//! Service layer for the scraper application.
//!
//! This module contains the business logic for:
//! - Article URL classification (`pattern`)
//! - Link discovery over a site's navigation (`Discoverer`)
//! - Article extraction and login collaborators (`MetaExtractor`, `NoLogin`)
//! - The per-publication scrape cycle (`Scraper`)

pub mod discover;
pub mod extract;
pub mod login;
pub mod pattern;
pub mod scraper;

pub use discover::{DiscoverStats, Discoverer, DiscoveryOutcome, Rejection};
pub use extract::{ArticleExtractor, MetaExtractor};
pub use login::{Login, NoLogin};
pub use pattern::UrlMatcher;
pub use scraper::{RunStats, Scraper};
