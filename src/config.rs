use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScrapeError;
use crate::models::Partition;

pub const DEFAULT_BASE_URL: &str = "https://batdongsan.com.vn";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub webdriver_url: String,
    pub headless: bool,
    /// Bound on the wait for the listings container of a results page.
    pub page_timeout: Duration,
    /// Bound on the wait for the map reference of a detail page.
    pub detail_timeout: Duration,
    pub poll_interval: Duration,
    pub workers: usize,
    pub monitor_interval: Duration,
    pub start_page: u32,
    pub end_page: u32,
    /// Upper bound of the random pause between two result pages. Zero disables it.
    pub page_delay: Duration,
    /// Overwrite existing district files instead of appending to them.
    pub fresh: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: true,
            page_timeout: Duration::from_secs(10),
            detail_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            workers: 3,
            monitor_interval: Duration::from_secs(10),
            start_page: 1,
            end_page: 100,
            page_delay: Duration::from_millis(1500),
            fresh: false,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ScrapeError> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ScrapeError::InvalidConfig(format!("{} has invalid value {:?}", key, raw))),
        None => Ok(None),
    }
}

impl ScraperConfig {
    /// Defaults overridden by `SCRAPER_*` environment variables.
    pub fn from_env() -> Result<Self, ScrapeError> {
        let mut config = Self::default();

        if let Some(base_url) = env_string("SCRAPER_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(dir) = env_string("SCRAPER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_string("SCRAPER_WEBDRIVER_URL") {
            config.webdriver_url = url;
        }
        if let Some(workers) = env_parse::<usize>("SCRAPER_WORKERS")? {
            config.workers = workers;
        }
        if let Some(secs) = env_parse::<u64>("SCRAPER_PAGE_TIMEOUT_SECS")? {
            config.page_timeout = Duration::from_secs(secs);
            config.detail_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.workers == 0 {
            return Err(ScrapeError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.start_page == 0 {
            return Err(ScrapeError::InvalidConfig(
                "pages are numbered from 1".to_string(),
            ));
        }
        if self.start_page > self.end_page {
            return Err(ScrapeError::InvalidConfig(format!(
                "start page {} is after end page {}",
                self.start_page, self.end_page
            )));
        }
        if self.page_timeout.is_zero() || self.detail_timeout.is_zero() {
            return Err(ScrapeError::InvalidConfig(
                "wait timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Results page `page` of a district. Page 1 has no `/p1` segment.
    pub fn listing_url(&self, partition: &Partition, page: u32) -> String {
        let base = self.base_url.trim_end_matches('/');
        if page <= 1 {
            format!("{}/ban-can-ho-chung-cu-{}?cIds=650", base, partition)
        } else {
            format!("{}/ban-can-ho-chung-cu-{}/p{}?cIds=650", base, partition, page)
        }
    }

    pub fn debug_dump_path(&self, partition: &Partition, page: u32) -> PathBuf {
        self.data_dir
            .join("debug")
            .join(format!("{}_page_{}.html", partition, page))
    }

    pub fn merged_output_path(&self) -> PathBuf {
        self.data_dir.join("merged_real_estate_listings.csv")
    }
}
