use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{CacheValidators, Feed, NewFeed, NewPost, Post, StoreError};

/// Persistence operations the ingestion core needs.
///
/// Implementations must surface duplicate feed URLs and duplicate post links
/// as [`StoreError::UniqueViolation`]; the ingestion writer relies on that
/// variant to tell "already ingested" apart from real failures.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Feeds never fetched or last attempted strictly before `fetched_before`,
    /// never-fetched first, then oldest attempt first.
    async fn feeds_due(&self, fetched_before: DateTime<Utc>) -> Result<Vec<Feed>, StoreError>;

    async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError>;

    async fn feed_by_id(&self, id: i64) -> Result<Option<Feed>, StoreError>;

    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError>;

    async fn insert_feed(&self, feed: &NewFeed) -> Result<Feed, StoreError>;

    /// Stamps `last_fetched_at` only.
    async fn record_attempt(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Stamps `last_fetched_at` and overwrites only the validators present.
    async fn record_not_modified(
        &self,
        feed_id: i64,
        validators: &CacheValidators,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Stamps `last_fetched_at` and replaces both validators.
    async fn record_fetch(
        &self,
        feed_id: i64,
        validators: &CacheValidators,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_post(&self, post: &NewPost) -> Result<i64, StoreError>;

    async fn recent_posts(&self, feed_id: Option<i64>, limit: i64)
        -> Result<Vec<Post>, StoreError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn feeds_due(&self, fetched_before: DateTime<Utc>) -> Result<Vec<Feed>, StoreError> {
        Database::feeds_due(self, fetched_before).await
    }

    async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        Database::feed_by_url(self, url).await
    }

    async fn feed_by_id(&self, id: i64) -> Result<Option<Feed>, StoreError> {
        Database::feed_by_id(self, id).await
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        Database::list_feeds(self).await
    }

    async fn insert_feed(&self, feed: &NewFeed) -> Result<Feed, StoreError> {
        Database::insert_feed(self, feed).await
    }

    async fn record_attempt(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        Database::record_attempt(self, feed_id, at).await
    }

    async fn record_not_modified(
        &self,
        feed_id: i64,
        validators: &CacheValidators,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Database::record_not_modified(self, feed_id, validators, at).await
    }

    async fn record_fetch(
        &self,
        feed_id: i64,
        validators: &CacheValidators,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Database::record_fetch(self, feed_id, validators, at).await
    }

    async fn insert_post(&self, post: &NewPost) -> Result<i64, StoreError> {
        Database::insert_post(self, post).await
    }

    async fn recent_posts(
        &self,
        feed_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Post>, StoreError> {
        Database::recent_posts(self, feed_id, limit).await
    }
}
