use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, Document, Navigation};
use crate::config::ScraperConfig;
use crate::enricher;
use crate::error::Result;
use crate::extractor::{self, ExtractError, LISTINGS_READY};
use crate::models::{ListingKey, ListingRecord, PartialRecord, Partition};
use crate::store::RecordStore;

/// Which signal ended a district as "no more data".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndSignal {
    NoResults,
    NoContainer,
    NoOrganicListings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfData { page: u32, signal: EndSignal },
    /// The page never became ready and did not look like an end page either.
    /// The markup was saved to `dump` when that was possible.
    Anomaly { page: u32, dump: Option<PathBuf> },
    RangeExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfData { page, signal } => {
                write!(f, "end of data at page {} ({:?})", page, signal)
            }
            StopReason::Anomaly { page, dump: Some(path) } => {
                write!(f, "unexpected timeout at page {} (dumped to {})", page, path.display())
            }
            StopReason::Anomaly { page, dump: None } => {
                write!(f, "unexpected timeout at page {}", page)
            }
            StopReason::RangeExhausted => write!(f, "page range exhausted"),
        }
    }
}

#[derive(Debug)]
enum ControllerState {
    Fetching { page: u32 },
    Extracting { page: u32, document: Document },
    Enriching { page: u32, listings: Vec<PartialRecord> },
    Flushing { page: u32, batch: Vec<ListingRecord> },
    Stopped(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub partition: Partition,
    pub pages_flushed: u32,
    pub records_written: usize,
    pub duplicates_skipped: usize,
    pub reason: StopReason,
}

/// Drives one district through its page range on a single session.
pub struct PaginationController<'a> {
    config: &'a ScraperConfig,
    store: &'a RecordStore,
}

impl<'a> PaginationController<'a> {
    pub fn new(config: &'a ScraperConfig, store: &'a RecordStore) -> Self {
        Self { config, store }
    }

    pub async fn run<S: BrowserSession + ?Sized>(
        &self,
        session: &mut S,
        partition: &Partition,
    ) -> Result<PartitionOutcome> {
        let fresh = self.config.fresh;
        let mut header_written = !fresh && self.store.has_header(partition);
        let mut seen: HashSet<ListingKey> = if fresh {
            HashSet::new()
        } else {
            self.store.load_keys(partition)?
        };

        let mut outcome = PartitionOutcome {
            partition: partition.clone(),
            pages_flushed: 0,
            records_written: 0,
            duplicates_skipped: 0,
            reason: StopReason::RangeExhausted,
        };

        let mut state = ControllerState::Fetching {
            page: self.config.start_page,
        };

        loop {
            state = match state {
                ControllerState::Fetching { page } => self.fetch(session, partition, page).await?,

                ControllerState::Extracting { page, document } => {
                    match extractor::parse_listing_page(&document.html) {
                        Err(ExtractError::NoContainer) => {
                            ControllerState::Stopped(StopReason::EndOfData {
                                page,
                                signal: EndSignal::NoContainer,
                            })
                        }
                        Ok(found) if found.listings.is_empty() => {
                            ControllerState::Stopped(StopReason::EndOfData {
                                page,
                                signal: EndSignal::NoOrganicListings,
                            })
                        }
                        Ok(found) => {
                            info!(
                                "[{}] Page {}: {} cards, {} organic",
                                partition,
                                page,
                                found.cards_seen,
                                found.listings.len()
                            );

                            let mut listings = Vec::with_capacity(found.listings.len());
                            for listing in found.listings {
                                if seen.insert(listing.key()) {
                                    listings.push(listing);
                                } else {
                                    debug!(
                                        "[{}] Skipping already stored listing {} ({})",
                                        partition, listing.id, listing.date_posted
                                    );
                                    outcome.duplicates_skipped += 1;
                                }
                            }
                            ControllerState::Enriching { page, listings }
                        }
                    }
                }

                ControllerState::Enriching { page, listings } => {
                    let mut batch = Vec::with_capacity(listings.len());
                    for listing in listings {
                        let coordinates = enricher::enrich(
                            session,
                            &self.config.base_url,
                            listing.href.as_deref(),
                            self.config.detail_timeout,
                        )
                        .await?;
                        batch.push(listing.with_coordinates(coordinates));
                    }
                    ControllerState::Flushing { page, batch }
                }

                ControllerState::Flushing { page, batch } => {
                    self.store.append(partition, &batch, !header_written)?;
                    header_written = true;
                    outcome.pages_flushed += 1;
                    outcome.records_written += batch.len();
                    info!(
                        "[{}] Page {} flushed ({} new records)",
                        partition,
                        page,
                        batch.len()
                    );

                    if page < self.config.end_page {
                        self.pause().await;
                        ControllerState::Fetching { page: page + 1 }
                    } else {
                        ControllerState::Stopped(StopReason::RangeExhausted)
                    }
                }

                ControllerState::Stopped(reason) => {
                    info!("[{}] Stopped: {}", partition, reason);
                    outcome.reason = reason;
                    return Ok(outcome);
                }
            };
        }
    }

    async fn fetch<S: BrowserSession + ?Sized>(
        &self,
        session: &mut S,
        partition: &Partition,
        page: u32,
    ) -> Result<ControllerState> {
        let url = self.config.listing_url(partition, page);
        info!("[{}] Scraping page {}... {}", partition, page, url);

        let state = match session
            .navigate(&url, LISTINGS_READY, self.config.page_timeout)
            .await?
        {
            Navigation::Loaded(document) => {
                if extractor::is_no_results(&document) {
                    ControllerState::Stopped(StopReason::EndOfData {
                        page,
                        signal: EndSignal::NoResults,
                    })
                } else {
                    ControllerState::Extracting { page, document }
                }
            }
            Navigation::TimedOut(document) => {
                if extractor::is_no_results(&document) {
                    ControllerState::Stopped(StopReason::EndOfData {
                        page,
                        signal: EndSignal::NoResults,
                    })
                } else {
                    warn!(
                        "[{}] Page {} timed out without a no-results marker",
                        partition, page
                    );
                    let dump = self.dump(partition, page, &document).await;
                    ControllerState::Stopped(StopReason::Anomaly { page, dump })
                }
            }
        };
        Ok(state)
    }

    async fn dump(&self, partition: &Partition, page: u32, document: &Document) -> Option<PathBuf> {
        let path = self.config.debug_dump_path(partition, page);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Failed to create {}: {}", parent.display(), e);
                return None;
            }
        }

        match tokio::fs::write(&path, &document.html).await {
            Ok(()) => {
                info!("Saved page HTML to {} ({} bytes)", path.display(), document.html.len());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to write debug dump {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn pause(&self) {
        let max_ms = self.config.page_delay.as_millis() as u64;
        if max_ms == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(max_ms / 2..=max_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
