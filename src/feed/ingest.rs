use serde::Serialize;

use super::parser::UnifiedItem;
use crate::storage::{FeedStore, NewPost, StoreError};

/// Per-batch insertion tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub inserted: usize,
    /// Link already stored, by this feed or another one.
    pub duplicate: usize,
    pub failed: usize,
}

impl IngestCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.duplicate + self.failed
    }
}

impl std::ops::AddAssign for IngestCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.duplicate += rhs.duplicate;
        self.failed += rhs.failed;
    }
}

/// Stores each item as a post keyed by its link.
///
/// A link that is already stored counts as `duplicate`. Any other storage
/// error is logged and counted as `failed`; the remaining items are still
/// attempted. Items without a link have no identity and are counted as
/// `failed` without touching the store.
pub async fn ingest<S>(store: &S, feed_id: i64, items: &[UnifiedItem]) -> IngestCounts
where
    S: FeedStore + ?Sized,
{
    let mut counts = IngestCounts::default();

    for item in items {
        if item.link.is_empty() {
            tracing::warn!(feed_id = feed_id, title = %item.title, "Skipping item without a link");
            counts.failed += 1;
            continue;
        }

        let post = NewPost {
            feed_id,
            title: item.title.clone(),
            url: item.link.clone(),
            description: Some(item.description.clone()).filter(|d| !d.is_empty()),
            published_at: item.published,
        };

        match store.insert_post(&post).await {
            Ok(_) => counts.inserted += 1,
            Err(StoreError::UniqueViolation(_)) => counts.duplicate += 1,
            Err(e) => {
                tracing::warn!(
                    feed_id = feed_id,
                    link = %item.link,
                    error = %e,
                    "Failed to store post"
                );
                counts.failed += 1;
            }
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, NewFeed};
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .insert_feed(&NewFeed {
                url: "https://example.com/rss".into(),
                name: "Example".into(),
                description: None,
            })
            .await
            .unwrap();
        (db, feed.id)
    }

    fn item(link: &str, description: &str) -> UnifiedItem {
        UnifiedItem {
            title: format!("Title for {link}"),
            link: link.to_string(),
            description: description.to_string(),
            published: DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn test_ingest_inserts_then_counts_duplicates() {
        let (db, feed_id) = setup().await;
        let items = vec![
            item("https://example.com/a", "first"),
            item("https://example.com/b", ""),
        ];

        let first = ingest(&db, feed_id, &items).await;
        assert_eq!(
            first,
            IngestCounts {
                inserted: 2,
                duplicate: 0,
                failed: 0
            }
        );

        let second = ingest(&db, feed_id, &items).await;
        assert_eq!(
            second,
            IngestCounts {
                inserted: 0,
                duplicate: 2,
                failed: 0
            }
        );
        assert_eq!(db.recent_posts(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_duplicate_within_batch() {
        let (db, feed_id) = setup().await;
        let items = vec![
            item("https://example.com/same", "one"),
            item("https://example.com/same", "two"),
        ];

        let counts = ingest(&db, feed_id, &items).await;
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.duplicate, 1);
    }

    #[tokio::test]
    async fn test_ingest_stores_fields_and_drops_empty_description() {
        let (db, feed_id) = setup().await;
        ingest(&db, feed_id, &[item("https://example.com/a", "")]).await;

        let posts = db.recent_posts(Some(feed_id), 10).await.unwrap();
        assert_eq!(posts[0].title, "Title for https://example.com/a");
        assert_eq!(posts[0].description, None);
        assert_eq!(posts[0].published_at.to_rfc3339(), "2024-01-01T12:00:00+00:00");
    }

    #[tokio::test]
    async fn test_ingest_item_without_link_fails_alone() {
        let (db, feed_id) = setup().await;
        let items = vec![item("", "no identity"), item("https://example.com/ok", "")];

        let counts = ingest(&db, feed_id, &items).await;
        assert_eq!(
            counts,
            IngestCounts {
                inserted: 1,
                duplicate: 0,
                failed: 1
            }
        );
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn test_ingest_unknown_feed_counts_failed() {
        let (db, _) = setup().await;
        let counts = ingest(&db, 4242, &[item("https://example.com/x", "")]).await;
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.inserted, 0);
    }
}
