use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{CacheValidators, Feed, FeedRow, NewFeed, StoreError};

const FEED_COLUMNS: &str =
    "id, url, name, description, etag, last_modified, last_fetched_at, created_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Feeds never fetched, or last attempted strictly before `fetched_before`.
    ///
    /// Never-fetched feeds come first, then oldest attempt first, ties broken by id.
    pub async fn feeds_due(&self, fetched_before: DateTime<Utc>) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            r#"
                SELECT {FEED_COLUMNS}
                FROM feeds
                WHERE last_fetched_at IS NULL OR last_fetched_at < ?
                ORDER BY last_fetched_at IS NOT NULL, last_fetched_at, id
            "#
        ))
        .bind(fetched_before.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    pub async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"))
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    pub async fn feed_by_id(&self, id: i64) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    /// All feeds, ordered by name
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY name COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// Insert a new feed.
    ///
    /// # Errors
    ///
    /// `StoreError::UniqueViolation` if a feed with the same URL exists.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<Feed, StoreError> {
        let row: FeedRow = sqlx::query_as(&format!(
            r#"
                INSERT INTO feeds (url, name, description, created_at)
                VALUES (?, ?, ?, ?)
                RETURNING {FEED_COLUMNS}
            "#
        ))
        .bind(&feed.url)
        .bind(&feed.name)
        .bind(&feed.description)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_feed())
    }

    /// Stamp a poll attempt without touching the cache validators.
    pub async fn record_attempt(&self, feed_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET last_fetched_at = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stamp a 304 response. Only validators the server sent again replace
    /// the stored ones.
    pub async fn record_not_modified(
        &self,
        feed_id: i64,
        validators: &CacheValidators,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
                UPDATE feeds
                SET etag = COALESCE(?, etag),
                    last_modified = COALESCE(?, last_modified),
                    last_fetched_at = ?
                WHERE id = ?
            "#,
        )
        .bind(&validators.etag)
        .bind(&validators.last_modified)
        .bind(at.timestamp())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamp a 200 response. Both validators are replaced; a header the
    /// server did not send clears the stored value.
    pub async fn record_fetch(
        &self,
        feed_id: i64,
        validators: &CacheValidators,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE feeds SET etag = ?, last_modified = ?, last_fetched_at = ? WHERE id = ?",
        )
        .bind(&validators.etag)
        .bind(&validators.last_modified)
        .bind(at.timestamp())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_feed(id: i64) -> NewFeed {
        NewFeed {
            url: format!("https://feed{}.example.com/rss", id),
            name: format!("Test Feed {}", id),
            description: None,
        }
    }

    fn validators(etag: Option<&str>, last_modified: Option<&str>) -> CacheValidators {
        CacheValidators {
            etag: etag.map(String::from),
            last_modified: last_modified.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup_feed() {
        let db = test_db().await;
        let inserted = db.insert_feed(&test_feed(1)).await.unwrap();
        assert_eq!(inserted.name, "Test Feed 1");
        assert_eq!(inserted.last_fetched_at, None);
        assert_eq!(inserted.etag, None);

        let by_url = db.feed_by_url(&inserted.url).await.unwrap();
        assert_eq!(by_url.as_ref(), Some(&inserted));
        let by_id = db.feed_by_id(inserted.id).await.unwrap();
        assert_eq!(by_id, Some(inserted));
        assert_eq!(db.feed_by_url("https://missing.example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_duplicate_url_is_unique_violation() {
        let db = test_db().await;
        db.insert_feed(&test_feed(1)).await.unwrap();
        let err = db.insert_feed(&test_feed(1)).await.unwrap_err();
        assert!(err.is_unique_violation(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_feeds_due_cutoff_and_order() {
        let db = test_db().await;
        let now = Utc::now();
        let fresh = db.insert_feed(&test_feed(1)).await.unwrap();
        let stale = db.insert_feed(&test_feed(2)).await.unwrap();
        let staler = db.insert_feed(&test_feed(3)).await.unwrap();
        let never = db.insert_feed(&test_feed(4)).await.unwrap();

        db.record_attempt(fresh.id, now - Duration::minutes(30)).await.unwrap();
        db.record_attempt(stale.id, now - Duration::hours(2)).await.unwrap();
        db.record_attempt(staler.id, now - Duration::hours(5)).await.unwrap();

        let due: Vec<i64> = db
            .feeds_due(now - Duration::hours(1))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(due, vec![never.id, staler.id, stale.id]);
    }

    #[tokio::test]
    async fn test_feeds_due_bound_is_exclusive() {
        let db = test_db().await;
        let feed = db.insert_feed(&test_feed(1)).await.unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        db.record_attempt(feed.id, at).await.unwrap();

        assert!(db.feeds_due(at).await.unwrap().is_empty());
        assert_eq!(db.feeds_due(at + Duration::seconds(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_fetch_replaces_validators() {
        let db = test_db().await;
        let feed = db.insert_feed(&test_feed(1)).await.unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        db.record_fetch(feed.id, &validators(Some("\"v1\""), Some("Mon, 01 Jan 2024 00:00:00 GMT")), at)
            .await
            .unwrap();
        db.record_fetch(feed.id, &validators(Some("\"v2\""), None), at).await.unwrap();

        let stored = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.validators(), validators(Some("\"v2\""), None));
        assert_eq!(stored.last_fetched_at, Some(at));
    }

    #[tokio::test]
    async fn test_record_not_modified_keeps_absent_validators() {
        let db = test_db().await;
        let feed = db.insert_feed(&test_feed(1)).await.unwrap();
        let first = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let second = first + Duration::hours(2);

        db.record_fetch(feed.id, &validators(Some("\"abc\""), Some("Mon, 01 Jan 2024 00:00:00 GMT")), first)
            .await
            .unwrap();
        db.record_not_modified(feed.id, &CacheValidators::default(), second)
            .await
            .unwrap();

        let stored = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(
            stored.validators(),
            validators(Some("\"abc\""), Some("Mon, 01 Jan 2024 00:00:00 GMT"))
        );
        assert_eq!(stored.last_fetched_at, Some(second));

        db.record_not_modified(feed.id, &validators(Some("\"def\""), None), second)
            .await
            .unwrap();
        let stored = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.etag.as_deref(), Some("\"def\""));
        assert_eq!(stored.last_modified.as_deref(), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
    }

    #[tokio::test]
    async fn test_record_attempt_leaves_validators() {
        let db = test_db().await;
        let feed = db.insert_feed(&test_feed(1)).await.unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        db.record_fetch(feed.id, &validators(Some("\"abc\""), None), at).await.unwrap();
        db.record_attempt(feed.id, at + Duration::minutes(5)).await.unwrap();

        let stored = db.feed_by_id(feed.id).await.unwrap().unwrap();
        assert_eq!(stored.etag.as_deref(), Some("\"abc\""));
        assert_eq!(stored.last_fetched_at, Some(at + Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_list_feeds_sorted_by_name() {
        let db = test_db().await;
        for (i, name) in ["zeta", "Alpha", "beta"].iter().enumerate() {
            db.insert_feed(&NewFeed {
                url: format!("https://{}.example.com/{}", name, i),
                name: name.to_string(),
                description: Some(format!("{} feed", name)),
            })
            .await
            .unwrap();
        }
        let names: Vec<String> = db.list_feeds().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["Alpha", "beta", "zeta"]);
    }
}
