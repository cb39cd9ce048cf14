//! Feed ingestion: from a subscription URL to stored posts.
//!
//! - [`date`] - feed timestamp normalization (RFC 1123 and RFC 3339)
//! - [`parser`] - RSS 2.0 / Atom decoding into [`UnifiedFeed`]
//! - [`fetcher`] - conditional HTTP GET with ETag / Last-Modified replay
//! - [`mod@ingest`] - idempotent post insertion keyed by link
//! - [`scheduler`] - one-shot and periodic scrape cycles over due feeds
//! - [`mod@subscribe`] - adding a feed on demand
//!
//! # Example
//!
//! ```ignore
//! use gator::feed::{ConditionalFetcher, Scraper};
//!
//! let scraper = Scraper::new(db, ConditionalFetcher::from_config(&config)?);
//! let report = scraper.scrape_due(config.scrape_cutoff()).await?;
//! println!("{} new posts", report.summary().posts.inserted);
//! ```

pub mod date;
pub mod fetcher;
pub mod ingest;
pub mod parser;
pub mod scheduler;
pub mod subscribe;

pub use date::{normalize_date, DateParseError};
pub use fetcher::{ConditionalFetcher, FetchError, FetchOutcome, PRODUCT_USER_AGENT};
pub use ingest::{ingest, IngestCounts};
pub use parser::{parse_feed, ParseError, UnifiedFeed, UnifiedItem};
pub use scheduler::{FeedFailure, FeedOutcome, FeedReport, ScrapeReport, ScrapeSummary, Scraper};
pub use subscribe::{subscribe, SubscribeError, Subscription};
