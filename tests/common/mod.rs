#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hanoi_listings::browser::{BrowserSession, Document, Navigation, SessionFactory};
use hanoi_listings::config::ScraperConfig;
use hanoi_listings::error::BrowserError;

pub const BASE_URL: &str = "https://bds.test";

#[derive(Debug, Clone)]
pub enum Response {
    Loaded(String),
    TimedOut(String),
    Fail,
    Panic,
}

/// Serves canned pages by URL. Unknown URLs time out with an empty body.
#[derive(Debug, Default)]
pub struct FakeSession {
    pages: Arc<HashMap<String, Response>>,
    pub visited: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeSession {
    pub fn new(pages: HashMap<String, Response>) -> Self {
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(
        &mut self,
        url: &str,
        _ready: &str,
        _timeout: Duration,
    ) -> Result<Navigation, BrowserError> {
        self.visited.lock().unwrap().push(url.to_string());
        let doc = |html: &str| Document {
            url: url.to_string(),
            title: "Bán căn hộ chung cư".to_string(),
            html: html.to_string(),
        };

        match self.pages.get(url) {
            Some(Response::Loaded(html)) => Ok(Navigation::Loaded(doc(html))),
            Some(Response::TimedOut(html)) => Ok(Navigation::TimedOut(doc(html))),
            Some(Response::Fail) => Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "connection reset".to_string(),
            }),
            Some(Response::Panic) => panic!("browser crashed on {}", url),
            None => Ok(Navigation::TimedOut(doc("<html><body></body></html>"))),
        }
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out sessions sharing one page table. The first `fail_opens`
/// calls to `open` fail.
pub struct FakeFactory {
    pub pages: Arc<HashMap<String, Response>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub fail_opens: usize,
}

impl FakeFactory {
    pub fn new(pages: HashMap<String, Response>) -> Self {
        Self {
            pages: Arc::new(pages),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            fail_opens: 0,
        }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn open(&self) -> Result<FakeSession, BrowserError> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_opens {
            return Err(BrowserError::Launch("chromedriver not reachable".to_string()));
        }
        Ok(FakeSession {
            pages: Arc::clone(&self.pages),
            visited: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::clone(&self.closed),
        })
    }
}

pub fn config(data_dir: &Path, start_page: u32, end_page: u32) -> ScraperConfig {
    ScraperConfig {
        base_url: BASE_URL.to_string(),
        data_dir: data_dir.to_path_buf(),
        page_timeout: Duration::from_millis(50),
        detail_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        monitor_interval: Duration::from_millis(20),
        workers: 3,
        start_page,
        end_page,
        page_delay: Duration::ZERO,
        ..ScraperConfig::default()
    }
}

pub fn listing_url(district: &str, page: u32) -> String {
    if page == 1 {
        format!("{}/ban-can-ho-chung-cu-{}?cIds=650", BASE_URL, district)
    } else {
        format!("{}/ban-can-ho-chung-cu-{}/p{}?cIds=650", BASE_URL, district, page)
    }
}

pub fn detail_path(id: &str) -> String {
    format!("/ban-can-ho-chung-cu-pr{}", id)
}

pub fn detail_url(id: &str) -> String {
    format!("{}{}", BASE_URL, detail_path(id))
}

pub fn organic_card(id: &str, date: &str) -> String {
    format!(
        r#"<div class="js__card re__card-full" prid="{id}">
             <a class="js__product-link-for-product-id" data-product-id="{id}" href="{href}">
               <span class="pr-title js__card-title">Căn hộ {id}</span>
             </a>
             <span class="re__card-config-price js__card-config-item">3,2 tỷ</span>
             <span class="re__card-config-area js__card-config-item">64 m²</span>
             <span class="re__card-config-price_per_m2 js__card-config-item">50 tr/m²</span>
             <span class="re__card-config-bedroom js__card-config-item">2</span>
             <span class="re__card-config-toilet js__card-config-item">2</span>
             <div class="re__card-location"><span>Cầu Giấy, Hà Nội</span></div>
             <span class="re__card-published-info-published-at" aria-label="{date}">Đăng hôm nay</span>
           </div>"#,
        href = detail_path(id)
    )
}

pub fn ad_card(id: &str) -> String {
    format!(
        r#"<div class="js__card js__card-ads" prid="{id}">
             <a class="js__product-link-for-product-id" href="/quang-cao-{id}">
               <span class="js__card-title">Quảng cáo</span></a>
             <span class="re__card-config-price">9 tỷ</span>
           </div>"#
    )
}

pub fn results_page(cards: &[String]) -> String {
    format!(
        r#"<html><body><div id="product-lists-web">{}</div></body></html>"#,
        cards.concat()
    )
}

pub fn detail_page(lat: &str, lon: &str) -> String {
    format!(
        r#"<html><body><div class="re__pr-map">
             <iframe data-src="https://www.google.com/maps/embed/v1/place?q={lat},{lon}&key=k"></iframe>
           </div></body></html>"#
    )
}
