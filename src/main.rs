use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use gator::config::Config;
use gator::feed::{subscribe, ConditionalFetcher, FeedOutcome, Scraper};
use gator::storage::{Database, StoreError};

/// Get the config directory path (~/.config/gator/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gator"))
}

/// Create the config directory if needed, owner-only on Unix.
fn ensure_config_dir(config_dir: &std::path::Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
    }

    // SEC-007: user-only access to the directory holding the database
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "RSS/Atom feed aggregator")]
struct Args {
    /// Config file (default: ~/.config/gator/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the config file
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every due feed once
    Scrape {
        /// Minutes since the last attempt before a feed is due again
        #[arg(long, value_name = "MINUTES")]
        cutoff: Option<u64>,
        /// Print the per-feed report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Poll due feeds on a fixed interval until Ctrl-C
    Watch {
        /// Minutes to sleep between cycles
        #[arg(long, value_name = "MINUTES")]
        interval: Option<u64>,
        #[arg(long, value_name = "MINUTES")]
        cutoff: Option<u64>,
    },
    /// Subscribe to a feed and ingest its current items
    Add {
        url: String,
        /// Display name (default: the feed's title)
        #[arg(long)]
        name: Option<String>,
    },
    /// List subscribed feeds
    Feeds,
    /// List recent posts
    Posts {
        #[arg(long)]
        feed_id: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match &args.database {
        Some(path) => path.clone(),
        None => {
            ensure_config_dir(&config_dir)?;
            config.database_path_in(&config_dir)
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: {}", StoreError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let fetcher =
        ConditionalFetcher::from_config(&config).context("Failed to create HTTP client")?;

    match args.command {
        Command::Scrape { cutoff, json } => {
            let cutoff = cutoff.map(minutes).unwrap_or_else(|| config.scrape_cutoff());
            let scraper = Scraper::new(db, fetcher);
            let report = scraper
                .scrape_due(cutoff)
                .await
                .context("Failed to load due feeds")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for feed in &report.feeds {
                    let status = match &feed.outcome {
                        FeedOutcome::NotModified => "not modified".to_string(),
                        FeedOutcome::RateLimited => "rate limited, skipped".to_string(),
                        FeedOutcome::Updated(c) => format!(
                            "{} new, {} known, {} failed",
                            c.inserted, c.duplicate, c.failed
                        ),
                        FeedOutcome::Failed { error } => format!("error: {}", error),
                    };
                    println!("{}: {}", feed.url, status);
                }
                let summary = report.summary();
                println!(
                    "{} feeds polled, {} new posts",
                    summary.attempted, summary.posts.inserted
                );
            }
        }
        Command::Watch { interval, cutoff } => {
            let interval = interval.map(minutes).unwrap_or_else(|| config.poll_interval());
            let cutoff = cutoff.map(minutes).unwrap_or_else(|| config.scrape_cutoff());
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
            });

            let scraper = Scraper::new(db, fetcher);
            scraper.run_periodic(interval, cutoff, shutdown_rx).await;
        }
        Command::Add { url, name } => {
            let sub = subscribe(
                &db,
                &fetcher,
                &url,
                name.as_deref(),
                config.allow_private_hosts,
            )
            .await
            .with_context(|| format!("Failed to add feed {}", url))?;
            println!(
                "Added \"{}\" ({}) with {} posts",
                sub.feed.name, sub.feed.url, sub.initial.inserted
            );
        }
        Command::Feeds => {
            let feeds = db.list_feeds().await.context("Failed to load feeds")?;
            if feeds.is_empty() {
                println!("No feeds yet. Add one with: gator add <url>");
            }
            for feed in feeds {
                let fetched = feed
                    .last_fetched_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{:>4}  {}  {}  (fetched {})", feed.id, feed.name, feed.url, fetched);
            }
        }
        Command::Posts { feed_id, limit } => {
            let posts = db
                .recent_posts(feed_id, limit)
                .await
                .context("Failed to load posts")?;
            for post in posts {
                println!(
                    "{}  {}\n      {}",
                    post.published_at.format("%Y-%m-%d"),
                    post.title,
                    post.url
                );
            }
        }
    }

    Ok(())
}
