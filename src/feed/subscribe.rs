use chrono::Utc;
use thiserror::Error;

use super::fetcher::{ConditionalFetcher, FetchError, FetchOutcome};
use super::ingest::{ingest, IngestCounts};
use crate::storage::{CacheValidators, Feed, FeedStore, NewFeed, StoreError};
use crate::util::{validate_feed_url, UrlValidationError};

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
    #[error("Already subscribed to {0}")]
    AlreadySubscribed(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A newly stored feed and the result of ingesting its current items.
#[derive(Debug)]
pub struct Subscription {
    pub feed: Feed,
    pub initial: IngestCounts,
}

/// Adds a feed by URL and ingests what it currently serves.
///
/// The display name is `name` when given, else the feed's own title, else
/// the URL. Errors are returned directly rather than collected in a report.
pub async fn subscribe<S>(
    store: &S,
    fetcher: &ConditionalFetcher,
    url: &str,
    name: Option<&str>,
    allow_private: bool,
) -> Result<Subscription, SubscribeError>
where
    S: FeedStore + ?Sized,
{
    let url = validate_feed_url(url, allow_private)?.to_string();
    if store.feed_by_url(&url).await?.is_some() {
        return Err(SubscribeError::AlreadySubscribed(url));
    }

    let (parsed, validators) = match fetcher.fetch(&url, &CacheValidators::default()).await? {
        FetchOutcome::Updated { feed, validators } => (feed, validators),
        // Unconditional requests should never see 304
        FetchOutcome::NotModified { .. } => {
            return Err(FetchError::HttpStatus(reqwest::StatusCode::NOT_MODIFIED.as_u16()).into())
        }
    };

    let display_name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| Some(parsed.title.trim()).filter(|t| !t.is_empty()))
        .unwrap_or(&url)
        .to_string();
    let description = Some(parsed.description.trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let mut feed = store
        .insert_feed(&NewFeed {
            url: url.clone(),
            name: display_name,
            description,
        })
        .await
        .map_err(|e| match e {
            StoreError::UniqueViolation(_) => SubscribeError::AlreadySubscribed(url.clone()),
            other => other.into(),
        })?;

    let fetched_at = Utc::now();
    store.record_fetch(feed.id, &validators, fetched_at).await?;
    feed.etag = validators.etag;
    feed.last_modified = validators.last_modified;
    feed.last_fetched_at = Some(fetched_at);

    let initial = ingest(store, feed.id, &parsed.items).await;
    tracing::info!(
        feed_id = feed.id,
        url = %feed.url,
        name = %feed.name,
        inserted = initial.inserted,
        "Subscribed to feed"
    );

    Ok(Subscription { feed, initial })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<rss version="2.0"><channel>
        <title>  Boot.dev Blog </title>
        <description>Learn to code</description>
        <item>
            <title>First</title>
            <link>https://blog.boot.dev/first</link>
            <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
        </item>
        <item>
            <title>Second</title>
            <link>https://blog.boot.dev/second</link>
            <pubDate>Tue, 02 Jan 2024 00:00:00 +0000</pubDate>
        </item>
    </channel></rss>"#;

    fn fetcher() -> ConditionalFetcher {
        ConditionalFetcher::with_client(reqwest::Client::new(), Duration::from_secs(5), 1024 * 1024)
    }

    async fn serve(body: &str, status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .insert_header("ETag", "\"v1\""),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_subscribe_stores_feed_and_initial_posts() {
        let server = serve(RSS, 200).await;
        let db = Database::open(":memory:").await.unwrap();
        let url = format!("{}/index.xml", server.uri());

        let sub = subscribe(&db, &fetcher(), &url, None, true).await.unwrap();
        assert_eq!(sub.feed.name, "Boot.dev Blog");
        assert_eq!(sub.feed.description.as_deref(), Some("Learn to code"));
        assert_eq!(sub.feed.etag.as_deref(), Some("\"v1\""));
        assert_eq!(sub.initial.inserted, 2);

        let stored = db.feed_by_url(&url).await.unwrap().unwrap();
        assert_eq!(stored.etag.as_deref(), Some("\"v1\""));
        assert!(stored.last_fetched_at.is_some());
        assert_eq!(db.recent_posts(Some(stored.id), 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_explicit_name_wins() {
        let server = serve(RSS, 200).await;
        let db = Database::open(":memory:").await.unwrap();

        let sub = subscribe(&db, &fetcher(), &server.uri(), Some(" Mine "), true)
            .await
            .unwrap();
        assert_eq!(sub.feed.name, "Mine");
    }

    #[tokio::test]
    async fn test_subscribe_untitled_feed_named_after_url() {
        let server = serve("<rss><channel></channel></rss>", 200).await;
        let db = Database::open(":memory:").await.unwrap();
        let url = format!("{}/feed", server.uri());

        let sub = subscribe(&db, &fetcher(), &url, None, true).await.unwrap();
        assert_eq!(sub.feed.name, url);
        assert_eq!(sub.feed.description, None);
    }

    #[tokio::test]
    async fn test_subscribe_twice_rejected() {
        let server = serve(RSS, 200).await;
        let db = Database::open(":memory:").await.unwrap();
        let url = format!("{}/feed", server.uri());

        subscribe(&db, &fetcher(), &url, None, true).await.unwrap();
        match subscribe(&db, &fetcher(), &url, None, true).await {
            Err(SubscribeError::AlreadySubscribed(u)) => assert_eq!(u, url),
            other => panic!("Expected AlreadySubscribed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_private_host_rejected_by_default() {
        let server = serve(RSS, 200).await;
        let db = Database::open(":memory:").await.unwrap();

        match subscribe(&db, &fetcher(), &server.uri(), None, false).await {
            Err(SubscribeError::InvalidUrl(_)) => {}
            other => panic!("Expected InvalidUrl, got {:?}", other),
        }
        assert!(db.list_feeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_fetch_error_stores_nothing() {
        let server = serve("gone", 410).await;
        let db = Database::open(":memory:").await.unwrap();

        match subscribe(&db, &fetcher(), &server.uri(), None, true).await {
            Err(SubscribeError::Fetch(FetchError::HttpStatus(410))) => {}
            other => panic!("Expected HttpStatus(410), got {:?}", other),
        }
        assert!(db.list_feeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_malformed_feed_returned_to_caller() {
        let server = serve("<html><body>not a feed</body></html>", 200).await;
        let db = Database::open(":memory:").await.unwrap();

        assert!(matches!(
            subscribe(&db, &fetcher(), &server.uri(), None, true).await,
            Err(SubscribeError::Fetch(FetchError::Malformed(_)))
        ));
    }
}
