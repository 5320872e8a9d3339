use std::time::Duration;

use async_trait::async_trait;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;
use tracing::{debug, info, warn};

use crate::error::BrowserError;

/// Snapshot of the page a session is showing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub url: String,
    pub title: String,
    pub html: String,
}

/// Result of a navigation. A wait that runs out is reported, not raised,
/// and still carries whatever the browser had rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Loaded(Document),
    TimedOut(Document),
}

impl Navigation {
    pub fn document(&self) -> &Document {
        match self {
            Navigation::Loaded(doc) | Navigation::TimedOut(doc) => doc,
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            Navigation::Loaded(doc) | Navigation::TimedOut(doc) => doc,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, Navigation::TimedOut(_))
    }
}

/// A single browser tab. Every navigation replaces the current document,
/// so callers must not assume a previous `Document` still reflects the page.
#[async_trait]
pub trait BrowserSession: Send {
    /// Loads `url` and waits up to `timeout` for an element matching the CSS
    /// selector `ready` to be present.
    async fn navigate(
        &mut self,
        url: &str,
        ready: &str,
        timeout: Duration,
    ) -> Result<Navigation, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Opens one session per district task.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession + 'static;

    async fn open(&self) -> Result<Self::Session, BrowserError>;
}

/// Chrome driven through a WebDriver endpoint (chromedriver).
pub struct WebDriverSession {
    driver: Option<WebDriver>,
    poll_interval: Duration,
}

impl WebDriverSession {
    pub async fn connect(
        webdriver_url: &str,
        headless: bool,
        poll_interval: Duration,
    ) -> Result<Self, BrowserError> {
        let mut caps = DesiredCapabilities::chrome();
        if headless {
            caps.add_chrome_arg("--headless")?;
        }
        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--window-size=1920,1080")?;

        let driver = WebDriver::new(webdriver_url, caps)
            .await
            .map_err(|e| BrowserError::Launch(format!("{} ({})", e, webdriver_url)))?;

        driver
            .set_page_load_timeout(Duration::from_secs(60))
            .await?;
        driver.set_script_timeout(Duration::from_secs(60)).await?;

        debug!("Connected to WebDriver at {}", webdriver_url);
        Ok(Self {
            driver: Some(driver),
            poll_interval,
        })
    }

    fn driver(&self) -> Result<&WebDriver, BrowserError> {
        self.driver.as_ref().ok_or(BrowserError::Closed)
    }

    async fn snapshot(driver: &WebDriver) -> Result<Document, BrowserError> {
        let url = driver
            .current_url()
            .await
            .map(|u| u.to_string())
            .unwrap_or_default();
        let title = driver.title().await.unwrap_or_default();
        let html = driver.source().await?;
        Ok(Document { url, title, html })
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(
        &mut self,
        url: &str,
        ready: &str,
        timeout: Duration,
    ) -> Result<Navigation, BrowserError> {
        let poll = self.poll_interval;
        let driver = self.driver()?;

        match driver.goto(url).await {
            Ok(()) => {}
            // The page load limit ran out; report it like a wait that ran out.
            Err(WebDriverError::Timeout(..)) => {
                warn!("Page load timed out on {}", url);
                let document = Self::snapshot(driver).await?;
                return Ok(Navigation::TimedOut(document));
            }
            Err(e) => {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        }

        let present = driver
            .query(By::Css(ready))
            .wait(timeout, poll)
            .exists()
            .await?;

        let document = Self::snapshot(driver).await?;
        if present {
            Ok(Navigation::Loaded(document))
        } else {
            debug!("Timed out after {:?} waiting for {} on {}", timeout, ready, url);
            Ok(Navigation::TimedOut(document))
        }
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await?;
            info!("Browser session closed");
        }
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.driver.is_some() {
            warn!("WebDriver session dropped without close(); the remote browser may linger");
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    pub webdriver_url: String,
    pub headless: bool,
    pub poll_interval: Duration,
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    type Session = WebDriverSession;

    async fn open(&self) -> Result<WebDriverSession, BrowserError> {
        WebDriverSession::connect(&self.webdriver_url, self.headless, self.poll_interval).await
    }
}
