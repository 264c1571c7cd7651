//! Background crawl loop.
//!
//! One prefix per iteration, visited in ring order over every prefix some
//! feed references. Each visit lists the account's releases newest-first and
//! stops at the first release already stored, so a steady-state pass costs a
//! single page fetch. Errors are logged and the loop carries on.

use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bandcamp::{BandcampClient, ExtractionError};
use crate::storage::{Database, DatabaseError};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Outcome of one pass over one prefix.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlReport {
    /// Entries on the account's release list
    pub listed: usize,
    /// New releases stored
    pub added: usize,
    /// New releases whose detail page failed; retried next pass
    pub skipped: usize,
    /// New releases fetched fine but listed above a failed one. Left
    /// unstored so the failed one stays reachable; refetched next pass.
    pub deferred: usize,
}

pub struct Crawler {
    db: Database,
    client: BandcampClient,
    interval: Duration,
}

impl Crawler {
    pub fn new(db: Database, client: BandcampClient, interval: Duration) -> Self {
        Self {
            db,
            client,
            interval,
        }
    }

    /// Crawl one prefix once, storing every release newer than the newest
    /// one already known.
    ///
    /// Details for the whole new slice are fetched before anything is
    /// stored. Only the entries listed after the last failure are written,
    /// oldest first, so the boundary of known releases never moves past a
    /// release that still has to be retried.
    pub async fn crawl_prefix(&self, prefix: &str) -> Result<CrawlReport, CrawlError> {
        let listed = self.client.list_releases(prefix).await?;
        let mut report = CrawlReport {
            listed: listed.len(),
            ..CrawlReport::default()
        };

        let mut seen = HashSet::new();
        let mut fetched = Vec::new();
        for entry in &listed {
            if self.db.is_release_present(&entry.id).await? {
                break;
            }
            if !seen.insert(entry.id.as_str()) {
                continue;
            }
            match self.client.fetch_detail(entry).await {
                Ok(release) => fetched.push(Some(release)),
                Err(e) => {
                    tracing::warn!(
                        prefix = %prefix,
                        url = %entry.url,
                        error = %e,
                        "Failed to fetch release details, will retry"
                    );
                    report.skipped += 1;
                    fetched.push(None);
                }
            }
        }

        let storable_from = fetched
            .iter()
            .rposition(Option::is_none)
            .map_or(0, |failed| failed + 1);
        let (held_back, storable) = fetched.split_at(storable_from);
        report.deferred = held_back.iter().flatten().count();

        for release in storable.iter().rev().flatten() {
            self.db.add_release(prefix, release).await?;
            report.added += 1;
        }

        Ok(report)
    }

    /// Run one loop iteration: advance the cursor and crawl that prefix.
    ///
    /// Returns the cursor for the next iteration. If the store can't be read
    /// the previous cursor is kept.
    pub async fn tick(&self, cursor: Option<String>) -> Option<String> {
        let next = match self.db.get_next_prefix(cursor.as_deref()).await {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pick next prefix");
                return cursor;
            }
        };

        match &next {
            None => tracing::debug!("Nothing to crawl"),
            Some(prefix) => match self.crawl_prefix(prefix).await {
                Ok(report) if report.added > 0 || report.skipped > 0 => tracing::info!(
                    prefix = %prefix,
                    added = report.added,
                    skipped = report.skipped,
                    deferred = report.deferred,
                    "Crawled prefix"
                ),
                Ok(_) => tracing::debug!(prefix = %prefix, "No new releases"),
                Err(e) => tracing::warn!(prefix = %prefix, error = %e, "Crawl failed"),
            },
        }

        next
    }

    /// Crawl until `shutdown` becomes `true` or its sender is dropped.
    ///
    /// Shutdown is observed between iterations; an iteration in progress
    /// always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Crawler started");
        let mut cursor = None;

        while !*shutdown.borrow() {
            cursor = self.tick(cursor).await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Crawler stopped");
    }

    /// Run the loop on its own task. Send `true` on the returned sender to
    /// stop it.
    pub fn spawn(self) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { self.run(rx).await });
        (handle, tx)
    }
}
