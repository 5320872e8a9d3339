use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::browser::{BrowserSession, Navigation};
use crate::error::BrowserError;
use crate::models::NOT_AVAILABLE;

/// Embedded map of a detail page; its URL carries the coordinates.
pub const MAP_READY: &str = "div.re__pr-map iframe";

static MAP_FRAME: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(MAP_READY).unwrap_or_else(|e| panic!("invalid selector {MAP_READY:?}: {e}"))
});

static RE_COORDINATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d+\.\d+)\s*,\s*(-?\d+\.\d+)").expect("invalid regex: coordinates")
});

/// `"lat, lon"` from the first pair of signed decimals in `reference`.
pub fn parse_coordinates(reference: &str) -> Option<String> {
    let caps = RE_COORDINATES.captures(reference)?;
    Some(format!("{}, {}", &caps[1], &caps[2]))
}

/// Finds the map iframe and reads coordinates from its (lazy) source URL.
pub fn coordinates_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let frame = document.select(&MAP_FRAME).next()?;
    let reference = frame
        .value()
        .attr("data-src")
        .or_else(|| frame.value().attr("src"))?;
    parse_coordinates(reference)
}

/// Joins a card link onto the site root. Absolute links pass through.
pub fn absolute_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if href.starts_with('/') {
        format!("{}{}", base, href)
    } else {
        format!("{}/{}", base, href)
    }
}

/// Visits a listing's detail page and returns its coordinates, or `N/A`.
///
/// This replaces the session's current document. A missing link, a wait
/// that times out and a page without a usable map all yield `N/A`; only
/// failures of the session itself are returned as errors.
pub async fn enrich<S: BrowserSession + ?Sized>(
    session: &mut S,
    base_url: &str,
    href: Option<&str>,
    timeout: Duration,
) -> Result<String, BrowserError> {
    let Some(href) = href else {
        return Ok(NOT_AVAILABLE.to_string());
    };

    let url = absolute_url(base_url, href);
    debug!("Fetching detail page {}", url);

    match session.navigate(&url, MAP_READY, timeout).await? {
        Navigation::Loaded(doc) => Ok(coordinates_from_html(&doc.html).unwrap_or_else(|| {
            debug!("No coordinates in map reference on {}", url);
            NOT_AVAILABLE.to_string()
        })),
        Navigation::TimedOut(_) => {
            warn!("Timed out waiting for map on {}", url);
            Ok(NOT_AVAILABLE.to_string())
        }
    }
}
