use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use bandcamp_feed::bandcamp::BandcampClient;
use bandcamp_feed::config::Config;
use bandcamp_feed::crawler::Crawler;
use bandcamp_feed::feed::{render_feed, FeedService};
use bandcamp_feed::storage::{Database, DatabaseError, PageCursor, Prefix, ReleaseQuery};

/// Get the config directory path (~/.config/bandcamp-feed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("bandcamp-feed"))
}

#[derive(Parser, Debug)]
#[command(
    name = "bandcamp-feed",
    about = "Crawl Bandcamp accounts and serve their releases as feeds"
)]
struct Args {
    /// Config file (default: ~/.config/bandcamp-feed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overrides `db_path` from the config
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the crawl loop until interrupted
    Crawl,
    /// Crawl a single account once
    CrawlOnce { prefix: String },
    /// Import the accounts a Bandcamp fan follows
    Follow { username: String },
    /// Create a feed over one or more accounts
    CreateFeed {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        prefixes: Vec<String>,
    },
    /// Replace a feed's name and accounts
    EditFeed {
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        prefixes: Vec<String>,
    },
    /// Delete a feed
    DeleteFeed {
        id: Uuid,
        #[arg(long)]
        owner: String,
    },
    /// List the feeds an owner has
    Feeds {
        #[arg(long)]
        owner: String,
    },
    /// Print one page of a feed as JSON
    Page {
        id: Uuid,
        /// `nextPageKey` from the previous page
        #[arg(long)]
        cursor: Option<PageCursor>,
        /// Start from releases dated on or before this day (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<NaiveDate>,
        #[arg(long)]
        exclude_prereleases: bool,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Print the newest releases of a feed as RSS
    Rss {
        id: Uuid,
        /// Public URL of the feed, used as the channel link
        #[arg(long)]
        link: String,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
    },
}

fn to_prefixes(handles: Vec<String>) -> Vec<Prefix> {
    handles.into_iter().map(Prefix::new).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let db_path = config
        .db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The database is locked by another process. Please stop it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = BandcampClient::new(&config).context("Failed to create HTTP client")?;
    let service = FeedService::new(db.clone(), client.clone());

    match args.command {
        Command::Crawl => {
            let crawler = Crawler::new(db, client, config.crawl_interval());
            let (handle, shutdown) = crawler.spawn();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
            let _ = shutdown.send(true);
            handle.await.context("Crawler task failed")?;
        }
        Command::CrawlOnce { prefix } => {
            let crawler = Crawler::new(db, client, config.crawl_interval());
            let report = crawler
                .crawl_prefix(&prefix)
                .await
                .with_context(|| format!("Failed to crawl {}", prefix))?;
            println!(
                "{}: {} listed, {} added, {} skipped",
                prefix, report.listed, report.added, report.skipped
            );
        }
        Command::Follow { username } => {
            let prefixes = service
                .import_followed(&username)
                .await
                .with_context(|| format!("Failed to import accounts followed by {}", username))?;
            println!("{}", serde_json::to_string_pretty(&prefixes)?);
        }
        Command::CreateFeed {
            name,
            owner,
            prefixes,
        } => {
            let id = service
                .create_feed(&name, &owner, &to_prefixes(prefixes))
                .await
                .context("Failed to create feed")?;
            println!("{}", id);
        }
        Command::EditFeed {
            id,
            name,
            owner,
            prefixes,
        } => {
            let edited = service
                .edit_feed(id, &name, &owner, &to_prefixes(prefixes))
                .await
                .context("Failed to edit feed")?;
            if !edited {
                anyhow::bail!("Feed {} not found for {}", id, owner);
            }
        }
        Command::DeleteFeed { id, owner } => {
            let deleted = service
                .delete_feed(id, &owner)
                .await
                .context("Failed to delete feed")?;
            if !deleted {
                anyhow::bail!("Feed {} not found for {}", id, owner);
            }
        }
        Command::Feeds { owner } => {
            let feeds = service
                .user_feeds(&owner)
                .await
                .context("Failed to load feeds")?;
            println!("{}", serde_json::to_string_pretty(&feeds)?);
        }
        Command::Page {
            id,
            cursor,
            from_date,
            exclude_prereleases,
            page_size,
        } => {
            let query = ReleaseQuery {
                cursor,
                from_date,
                include_prereleases: !exclude_prereleases,
                page_size,
            };
            let page = service
                .feed_page(id, &query)
                .await
                .context("Failed to load feed page")?
                .ok_or_else(|| anyhow::anyhow!("Feed {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Rss {
            id,
            link,
            page_size,
        } => {
            let query = ReleaseQuery {
                page_size: Some(page_size),
                ..ReleaseQuery::default()
            };
            let page = service
                .feed_page(id, &query)
                .await
                .context("Failed to load feed page")?
                .ok_or_else(|| anyhow::anyhow!("Feed {} not found", id))?;
            println!("{}", render_feed(&page.name, &link, &page.releases)?);
        }
    }

    Ok(())
}
