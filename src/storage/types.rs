use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds a lock on the database file
    #[error("Another gator process appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A UNIQUE constraint rejected the write (duplicate feed URL or post link)
    #[error("Record already exists: {0}")]
    UniqueViolation(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

// SQLite primary result codes that mean "someone else has the file".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CANTOPEN: i32 = 14;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

impl StoreError {
    /// Classifies errors raised while opening the pool, mapping lock
    /// contention to [`StoreError::InstanceLocked`].
    pub(crate) fn from_open(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // Extended result codes carry the primary code in the low byte.
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if matches!(primary, Some(SQLITE_BUSY | SQLITE_LOCKED | SQLITE_CANTOPEN)) {
                return StoreError::InstanceLocked;
            }
        }
        StoreError::from(err)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

// ============================================================================
// Cache validators
// ============================================================================

/// HTTP cache validators remembered between polls of one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

// ============================================================================
// Records
// ============================================================================

/// A subscribed feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Time of the last poll attempt, whatever its outcome
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    pub fn validators(&self) -> CacheValidators {
        CacheValidators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

/// A feed about to be subscribed
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub url: String,
    pub name: String,
    pub description: Option<String>,
}

/// An ingested feed item. `url` is unique across all posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Timestamps are stored as Unix seconds.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_fetched_at: Option<i64>,
    pub created_at: i64,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            url: self.url,
            name: self.name,
            description: self.description,
            etag: self.etag,
            last_modified: self.last_modified,
            last_fetched_at: self.last_fetched_at.map(from_unix),
            created_at: from_unix(self.created_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: i64,
    pub created_at: i64,
}

impl PostRow {
    pub(crate) fn into_post(self) -> Post {
        Post {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            url: self.url,
            description: self.description,
            published_at: from_unix(self.published_at),
            created_at: from_unix(self.created_at),
        }
    }
}
