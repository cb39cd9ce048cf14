use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use super::fetcher::{ConditionalFetcher, FetchError, FetchOutcome};
use super::ingest::{ingest, IngestCounts};
use crate::storage::{Feed, FeedStore, StoreError};

/// Why a single feed produced nothing this cycle.
#[derive(Debug, Error)]
pub enum FeedFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to one due feed.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedOutcome {
    NotModified,
    /// 429: skipped until the next cycle.
    RateLimited,
    Updated(IngestCounts),
    Failed {
        #[serde(serialize_with = "serialize_display")]
        error: FeedFailure,
    },
}

#[derive(Debug, Serialize)]
pub struct FeedReport {
    pub feed_id: i64,
    pub url: String,
    pub outcome: FeedOutcome,
}

/// Per-feed outcomes of one cycle, in processing order.
#[derive(Debug, Default, Serialize)]
pub struct ScrapeReport {
    pub feeds: Vec<FeedReport>,
    /// Shutdown arrived before every due feed was processed.
    pub interrupted: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScrapeSummary {
    pub attempted: usize,
    pub updated: usize,
    pub not_modified: usize,
    pub rate_limited: usize,
    pub failed: usize,
    pub posts: IngestCounts,
}

impl ScrapeReport {
    pub fn summary(&self) -> ScrapeSummary {
        let mut summary = ScrapeSummary {
            attempted: self.feeds.len(),
            ..ScrapeSummary::default()
        };
        for report in &self.feeds {
            match &report.outcome {
                FeedOutcome::NotModified => summary.not_modified += 1,
                FeedOutcome::RateLimited => summary.rate_limited += 1,
                FeedOutcome::Updated(counts) => {
                    summary.updated += 1;
                    summary.posts += *counts;
                }
                FeedOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }

    pub fn outcome_for(&self, feed_id: i64) -> Option<&FeedOutcome> {
        self.feeds
            .iter()
            .find(|r| r.feed_id == feed_id)
            .map(|r| &r.outcome)
    }
}

/// Polls due feeds one at a time: conditional fetch, bookkeeping, ingestion.
pub struct Scraper<S> {
    store: S,
    fetcher: ConditionalFetcher,
}

impl<S: FeedStore> Scraper<S> {
    pub fn new(store: S, fetcher: ConditionalFetcher) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &ConditionalFetcher {
        &self.fetcher
    }

    /// Runs one cycle over feeds whose last attempt is older than `cutoff`.
    ///
    /// Per-feed failures land in the report. Only failing to list the due
    /// feeds is returned as an error.
    pub async fn scrape_due(&self, cutoff: Duration) -> Result<ScrapeReport, StoreError> {
        self.scrape_due_at(Utc::now(), cutoff).await
    }

    /// [`Scraper::scrape_due`] with an explicit clock; `now` is also the
    /// attempt time recorded on each feed.
    pub async fn scrape_due_at(
        &self,
        now: DateTime<Utc>,
        cutoff: Duration,
    ) -> Result<ScrapeReport, StoreError> {
        let (_keep_open, mut shutdown) = watch::channel(false);
        self.run_cycle(now, cutoff, &mut shutdown).await
    }

    /// [`Scraper::scrape_due`] that stops when `shutdown` flips to `true`.
    ///
    /// The in-flight fetch is abandoned and reported as
    /// [`FetchError::Cancelled`]; feeds finished earlier keep their results.
    pub async fn scrape_due_until(
        &self,
        cutoff: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ScrapeReport, StoreError> {
        self.run_cycle(Utc::now(), cutoff, shutdown).await
    }

    /// Runs a cycle, sleeps `interval`, repeats. Cycles never overlap.
    ///
    /// Returns the number of cycles started once `shutdown` becomes `true`.
    pub async fn run_periodic(
        &self,
        interval: Duration,
        cutoff: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut cycles = 0;
        tracing::info!(
            interval_secs = interval.as_secs(),
            cutoff_secs = cutoff.as_secs(),
            "Polling started"
        );

        while !*shutdown.borrow() {
            cycles += 1;
            match self.run_cycle(Utc::now(), cutoff, &mut shutdown).await {
                Ok(report) if report.interrupted => break,
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Scrape cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        tracing::info!(cycles = cycles, "Polling stopped");
        cycles
    }

    async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        cutoff: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ScrapeReport, StoreError> {
        let fetched_before = chrono::Duration::from_std(cutoff)
            .ok()
            .and_then(|c| now.checked_sub_signed(c))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let due = self.store.feeds_due(fetched_before).await?;
        tracing::info!(due = due.len(), "Starting scrape cycle");

        let mut report = ScrapeReport::default();
        for feed in &due {
            if *shutdown.borrow() {
                report.interrupted = true;
                break;
            }

            let outcome = self.scrape_feed(feed, now, shutdown).await;
            let cancelled = matches!(
                outcome,
                FeedOutcome::Failed {
                    error: FeedFailure::Fetch(FetchError::Cancelled)
                }
            );
            report.feeds.push(FeedReport {
                feed_id: feed.id,
                url: feed.url.clone(),
                outcome,
            });
            if cancelled {
                report.interrupted = true;
                break;
            }
        }

        let summary = report.summary();
        tracing::info!(
            attempted = summary.attempted,
            updated = summary.updated,
            not_modified = summary.not_modified,
            rate_limited = summary.rate_limited,
            failed = summary.failed,
            new_posts = summary.posts.inserted,
            "Scrape cycle finished"
        );
        Ok(report)
    }

    async fn scrape_feed(
        &self,
        feed: &Feed,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FeedOutcome {
        let validators = feed.validators();
        let fetched = tokio::select! {
            result = self.fetcher.fetch(&feed.url, &validators) => result,
            _ = shutdown_requested(shutdown) => Err(FetchError::Cancelled),
        };

        match fetched {
            Ok(FetchOutcome::NotModified { validators }) => {
                tracing::debug!(feed_id = feed.id, url = %feed.url, "Not modified");
                match self.store.record_not_modified(feed.id, &validators, now).await {
                    Ok(()) => FeedOutcome::NotModified,
                    Err(e) => self.failed(feed, e.into()),
                }
            }
            Ok(FetchOutcome::Updated {
                feed: parsed,
                validators,
            }) => {
                // Validators and timestamp are committed before any post is written.
                if let Err(e) = self.store.record_fetch(feed.id, &validators, now).await {
                    return self.failed(feed, e.into());
                }
                let counts = ingest(&self.store, feed.id, &parsed.items).await;
                tracing::info!(
                    feed_id = feed.id,
                    url = %feed.url,
                    inserted = counts.inserted,
                    duplicate = counts.duplicate,
                    failed = counts.failed,
                    "Feed updated"
                );
                FeedOutcome::Updated(counts)
            }
            Err(FetchError::Cancelled) => {
                tracing::info!(feed_id = feed.id, url = %feed.url, "Fetch cancelled by shutdown");
                FeedOutcome::Failed {
                    error: FetchError::Cancelled.into(),
                }
            }
            Err(e) => {
                // Every real attempt moves the feed out of the due window.
                if let Err(store_err) = self.store.record_attempt(feed.id, now).await {
                    tracing::warn!(
                        feed_id = feed.id,
                        error = %store_err,
                        "Failed to record fetch attempt"
                    );
                }
                if let FetchError::RateLimited { retry_after } = &e {
                    tracing::warn!(
                        feed_id = feed.id,
                        url = %feed.url,
                        retry_after_secs = retry_after.map(|d| d.as_secs()),
                        "Rate limited, skipping until next cycle"
                    );
                    FeedOutcome::RateLimited
                } else {
                    self.failed(feed, e.into())
                }
            }
        }
    }

    fn failed(&self, feed: &Feed, error: FeedFailure) -> FeedOutcome {
        tracing::warn!(feed_id = feed.id, url = %feed.url, error = %error, "Feed scrape failed");
        FeedOutcome::Failed { error }
    }
}

/// Resolves once `shutdown` holds `true`. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_str(value)
}
