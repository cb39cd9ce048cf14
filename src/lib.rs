//! gator: RSS/Atom feed ingestion.
//!
//! Feeds are polled on a cadence with HTTP conditional requests, decoded
//! into one format-agnostic model, and their items persisted idempotently
//! (one post per link).
//!
//! - [`feed`] - date normalization, RSS/Atom decoding, conditional fetching,
//!   ingestion and the scrape scheduler
//! - [`storage`] - the [`storage::FeedStore`] persistence seam and its SQLite
//!   implementation
//! - [`config`] - optional TOML configuration
//! - [`util`] - text and URL helpers

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
