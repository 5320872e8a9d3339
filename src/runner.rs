use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use chrono::{DateTime, Local};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::browser::{BrowserSession, SessionFactory};
use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::models::Partition;
use crate::monitor::ResourceMonitor;
use crate::pagination::{PaginationController, PartitionOutcome, StopReason};
use crate::store::RecordStore;

/// How one district task ended.
#[derive(Debug)]
pub struct PartitionReport {
    pub partition: Partition,
    pub result: Result<PartitionOutcome>,
}

impl PartitionReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Scrapes a single district on its own session. The session is closed and
/// the monitor joined on every exit path, including errors and panics.
pub async fn run_partition<F: SessionFactory>(
    factory: &F,
    config: &ScraperConfig,
    store: &RecordStore,
    partition: &Partition,
) -> Result<PartitionOutcome> {
    info!("Scraping listings for {}...", partition);

    let mut session = factory.open().await?;
    let monitor = ResourceMonitor::spawn(partition.to_string(), config.monitor_interval);

    // A panic in the controller must not skip the release below.
    let controller = PaginationController::new(config, store);
    let result = AssertUnwindSafe(controller.run(&mut session, partition))
        .catch_unwind()
        .await;

    monitor.stop().await;
    if let Err(e) = session.close().await {
        warn!("[{}] Failed to close browser session cleanly: {}", partition, e);
    }

    let result = match result {
        Ok(result) => result,
        Err(panic) => {
            error!("Scraping {} panicked; session released", partition);
            panic::resume_unwind(panic)
        }
    };

    match &result {
        Ok(outcome) => info!(
            "Finished scraping {}: {} records over {} pages",
            partition, outcome.records_written, outcome.pages_flushed
        ),
        Err(e) => error!("Scraping {} aborted: {}", partition, e),
    }
    result
}

/// Runs every district with at most `config.workers` in flight. A failing
/// district does not affect the others.
pub async fn scrape_partitions<F: SessionFactory>(
    factory: &F,
    config: &ScraperConfig,
    partitions: Vec<Partition>,
) -> Result<RunSummary> {
    config.validate()?;

    let store = RecordStore::new(&config.data_dir);
    let started_at = Local::now();
    let clock = Instant::now();

    info!(
        "Scraping {} districts with {} workers (pages {}..={})",
        partitions.len(),
        config.workers,
        config.start_page,
        config.end_page
    );

    let mut reports: Vec<PartitionReport> = stream::iter(partitions)
        .map(|partition| {
            let store = &store;
            async move {
                let result = run_partition(factory, config, store, &partition).await;
                PartitionReport { partition, result }
            }
        })
        .buffer_unordered(config.workers)
        .collect()
        .await;

    reports.sort_by(|a, b| a.partition.cmp(&b.partition));

    Ok(RunSummary {
        started_at,
        duration_secs: clock.elapsed().as_secs_f64(),
        reports,
    })
}

pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub duration_secs: f64,
    pub reports: Vec<PartitionReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    pub fn records_written(&self) -> usize {
        self.outcomes().map(|o| o.records_written).sum()
    }

    pub fn pages_flushed(&self) -> u32 {
        self.outcomes().map(|o| o.pages_flushed).sum()
    }

    fn outcomes(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.reports.iter().filter_map(|r| r.result.as_ref().ok())
    }

    pub fn pages_per_minute(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.pages_flushed() as f64 / self.duration_secs) * 60.0
        } else {
            0.0
        }
    }

    fn format_duration(&self) -> String {
        let total_secs = self.duration_secs as u64;
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    pub fn display(&self) {
        println!("\n╔══════════════════════════════════════════════════════════╗");
        println!("║              SCRAPE REPORT                               ║");
        println!("╠══════════════════════════════════════════════════════════╣");
        println!(
            "║  Started:                 {:>30} ║",
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!("║  Districts:               {:>30} ║", self.reports.len());
        println!("║  Succeeded:               {:>30} ║", self.succeeded());
        println!("║  Failed:                  {:>30} ║", self.failed());
        println!("║  Pages flushed:           {:>30} ║", self.pages_flushed());
        println!("║  Records written:         {:>30} ║", self.records_written());
        println!("║  Duration:                {:>30} ║", self.format_duration());
        println!(
            "║  Throughput:              {:>25.2} p/min ║",
            self.pages_per_minute()
        );
        println!("╚══════════════════════════════════════════════════════════╝");

        for report in &self.reports {
            match &report.result {
                Ok(outcome) => println!(
                    "  ✓ {:<14} {:>5} records  {:>3} pages  {:>4} dupes  {}",
                    report.partition,
                    outcome.records_written,
                    outcome.pages_flushed,
                    outcome.duplicates_skipped,
                    outcome.reason
                ),
                Err(e) => println!("  ✗ {:<14} {}", report.partition, e),
            }
        }
        println!();
    }

    /// Districts whose run ended on an unexpected timeout.
    pub fn anomalies(&self) -> Vec<&Partition> {
        self.reports
            .iter()
            .filter(|r| matches!(r.result, Ok(PartitionOutcome { reason: StopReason::Anomaly { .. }, .. })))
            .map(|r| &r.partition)
            .collect()
    }

    pub fn first_error(&self) -> Option<&ScrapeError> {
        self.reports.iter().find_map(|r| r.result.as_ref().err())
    }
}
