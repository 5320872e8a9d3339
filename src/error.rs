use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV failure on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the browser session itself. A wait that runs out of time is
/// not one of these; it surfaces as `Navigation::TimedOut`.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to start browser session: {0}")]
    Launch(String),
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("Browser session already closed")]
    Closed,
    #[error(transparent)]
    WebDriver(#[from] thirtyfour::error::WebDriverError),
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("Invalid district slug: {0:?}")]
    InvalidPartition(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;
