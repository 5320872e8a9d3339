use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::browser::Document;
use crate::models::{PartialRecord, NOT_AVAILABLE};

/// Present once the results list has rendered; used as the page-ready marker.
pub const LISTINGS_READY: &str = "#product-lists-web";

/// Shown by the site when a page number runs past the last result.
pub const NO_RESULTS_PHRASE: &str = "Không có kết quả nào phù hợp";

const PRODUCT_ID_ATTR: &str = "prid";
const AD_CARD_CLASSES: [&str; 3] = ["js__card-ads", "re__card-ads", "re__card-full-ads"];
const AD_LINK_CLASS: &str = "js__ads-link";
const VERIFIED_SIMILAR_CLASS: &str = "re__verified-similar-listing";

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

static CONTAINER: LazyLock<Selector> = LazyLock::new(|| selector(LISTINGS_READY));
static CARD: LazyLock<Selector> = LazyLock::new(|| selector("div.js__card"));
static PRODUCT_LINK: LazyLock<Selector> =
    LazyLock::new(|| selector("a.js__product-link-for-product-id"));
static PUBLISHED_AT: LazyLock<Selector> =
    LazyLock::new(|| selector("span.re__card-published-info-published-at"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("span.js__card-title"));
static PRICE: LazyLock<Selector> = LazyLock::new(|| selector("span.re__card-config-price"));
static AREA: LazyLock<Selector> = LazyLock::new(|| selector("span.re__card-config-area"));
static PRICE_PER_AREA: LazyLock<Selector> =
    LazyLock::new(|| selector("span.re__card-config-price_per_m2"));
static BEDROOMS: LazyLock<Selector> = LazyLock::new(|| selector("span.re__card-config-bedroom"));
static TOILETS: LazyLock<Selector> = LazyLock::new(|| selector("span.re__card-config-toilet"));
static LOCATION: LazyLock<Selector> = LazyLock::new(|| selector("div.re__card-location span"));
static ERROR_CONTENT: LazyLock<Selector> = LazyLock::new(|| selector("div.error-content"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("listings container #product-lists-web not found")]
    NoContainer,
}

/// Organic listings of one results page plus counts of what was dropped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageListings {
    pub cards_seen: usize,
    pub rejected: usize,
    pub listings: Vec<PartialRecord>,
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn or_missing(value: Option<String>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn first_text(card: ElementRef, sel: &Selector) -> Option<String> {
    card.select(sel)
        .next()
        .map(|e| normalize_whitespace(&e.text().collect::<String>()))
}

fn has_class(element: ElementRef, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// Candidate cards of the results list, in document order.
pub fn find_cards(document: &Html) -> Result<Vec<ElementRef<'_>>, ExtractError> {
    let container = document
        .select(&CONTAINER)
        .next()
        .ok_or(ExtractError::NoContainer)?;

    Ok(container.select(&CARD).collect())
}

/// Whether a card is a regular listing rather than a paid placement, a
/// placeholder, or part of the "similar verified listings" block.
pub fn is_organic(card: ElementRef) -> bool {
    if AD_CARD_CLASSES.iter().any(|class| has_class(card, class)) {
        return false;
    }

    if card.value().attr(PRODUCT_ID_ATTR).map(str::trim) == Some("0") {
        return false;
    }

    let nested_in_similar = card
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| has_class(ancestor, VERIFIED_SIMILAR_CLASS));
    if nested_in_similar {
        return false;
    }

    if let Some(link) = card.select(&PRODUCT_LINK).next() {
        if has_class(link, AD_LINK_CLASS) {
            return false;
        }
    }

    true
}

/// Reads the display fields of a card. Missing elements become `N/A`.
pub fn extract_fields(card: ElementRef) -> PartialRecord {
    let link = card.select(&PRODUCT_LINK).next();

    let id = card
        .value()
        .attr(PRODUCT_ID_ATTR)
        .or_else(|| link.and_then(|l| l.value().attr("data-product-id")))
        .map(|s| s.trim().to_string());

    // The visible text is a relative label; the exact date sits in aria-label.
    let date_posted = card.select(&PUBLISHED_AT).next().map(|e| {
        e.value()
            .attr("aria-label")
            .map(normalize_whitespace)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| normalize_whitespace(&e.text().collect::<String>()))
    });

    let href = link
        .and_then(|l| l.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string);

    PartialRecord {
        id: or_missing(id),
        date_posted: or_missing(date_posted),
        title: or_missing(first_text(card, &TITLE)),
        price: or_missing(first_text(card, &PRICE)),
        area: or_missing(first_text(card, &AREA)),
        price_per_area: or_missing(first_text(card, &PRICE_PER_AREA)),
        bedrooms: or_missing(first_text(card, &BEDROOMS)),
        toilets: or_missing(first_text(card, &TOILETS)),
        location: or_missing(first_text(card, &LOCATION)),
        href,
    }
}

/// Cards that carry a title but no listing data, or a location but nothing
/// else, are rendering leftovers rather than listings.
fn is_placeholder(record: &PartialRecord) -> bool {
    let missing = |v: &String| v == NOT_AVAILABLE;
    let details = [
        &record.price,
        &record.area,
        &record.price_per_area,
        &record.bedrooms,
        &record.toilets,
    ];

    let title_only = details.iter().all(|v| missing(v)) && missing(&record.location);
    let location_only = details.iter().all(|v| missing(v)) && missing(&record.title);
    title_only || location_only
}

/// Parses a results page into its organic listings. Runs synchronously so
/// the parsed DOM never lives across an await point.
pub fn parse_listing_page(html: &str) -> Result<PageListings, ExtractError> {
    let document = Html::parse_document(html);
    let cards = find_cards(&document)?;

    let mut page = PageListings {
        cards_seen: cards.len(),
        ..PageListings::default()
    };

    for card in cards {
        if !is_organic(card) {
            page.rejected += 1;
            continue;
        }

        let record = extract_fields(card);
        if is_placeholder(&record) {
            debug!("Skipping placeholder card {}", record.id);
            page.rejected += 1;
            continue;
        }

        debug!("Parsed card {} ({})", record.id, record.title);
        page.listings.push(record);
    }

    Ok(page)
}

/// True when the document is the site's "no results" or error page.
pub fn is_no_results(doc: &Document) -> bool {
    if doc.title.contains("404") {
        return true;
    }

    let document = Html::parse_document(&doc.html);
    if document.select(&ERROR_CONTENT).next().is_some() {
        return true;
    }

    // Rendered text, so entity-encoded markup still matches.
    let text = normalize_whitespace(&document.root_element().text().collect::<String>());
    text.contains(NO_RESULTS_PHRASE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(attrs: &str, body: &str) -> String {
        format!(r#"<div class="js__card re__card-full" {attrs}>{body}</div>"#)
    }

    fn full_body(id: &str) -> String {
        format!(
            r#"<a class="js__product-link-for-product-id" data-product-id="{id}" href="/ban-can-ho-chung-cu-pr{id}">
                 <span class="pr-title js__card-title"> Căn hộ   2PN view hồ </span>
               </a>
               <span class="re__card-config-price js__card-config-item">3,2 tỷ</span>
               <span class="re__card-config-area js__card-config-item">68 m²</span>
               <span class="re__card-config-price_per_m2 js__card-config-item">47,06 tr/m²</span>
               <span class="re__card-config-bedroom js__card-config-item"><span>2</span></span>
               <span class="re__card-config-toilet js__card-config-item"><span>2</span></span>
               <div class="re__card-location"><i></i><span>Cầu Giấy, Hà Nội</span></div>
               <span class="re__card-published-info-published-at" aria-label="12/10/2024">Đăng hôm nay</span>"#
        )
    }

    fn page(cards: &str) -> String {
        format!(r#"<html><body><div id="product-lists-web">{cards}</div></body></html>"#)
    }

    #[test]
    fn test_missing_container() {
        assert_eq!(
            parse_listing_page("<html><body><p>nothing</p></body></html>"),
            Err(ExtractError::NoContainer)
        );
    }

    #[test]
    fn test_extracts_all_fields() {
        let html = page(&card(r#"prid="41001""#, &full_body("41001")));
        let result = parse_listing_page(&html).unwrap();

        assert_eq!(result.cards_seen, 1);
        assert_eq!(result.listings.len(), 1);
        let listing = &result.listings[0];
        assert_eq!(listing.id, "41001");
        assert_eq!(listing.date_posted, "12/10/2024");
        assert_eq!(listing.title, "Căn hộ 2PN view hồ");
        assert_eq!(listing.price, "3,2 tỷ");
        assert_eq!(listing.area, "68 m²");
        assert_eq!(listing.price_per_area, "47,06 tr/m²");
        assert_eq!(listing.bedrooms, "2");
        assert_eq!(listing.toilets, "2");
        assert_eq!(listing.location, "Cầu Giấy, Hà Nội");
        assert_eq!(listing.href.as_deref(), Some("/ban-can-ho-chung-cu-pr41001"));
    }

    #[test]
    fn test_missing_fields_become_sentinel() {
        let body = r#"<span class="pr-title js__card-title">Bán gấp</span>
                      <span class="re__card-config-price">Giá thỏa thuận</span>"#;
        let html = page(&card("", body));
        let result = parse_listing_page(&html).unwrap();

        let listing = &result.listings[0];
        assert_eq!(listing.id, NOT_AVAILABLE);
        assert_eq!(listing.date_posted, NOT_AVAILABLE);
        assert_eq!(listing.area, NOT_AVAILABLE);
        assert_eq!(listing.bedrooms, NOT_AVAILABLE);
        assert_eq!(listing.location, NOT_AVAILABLE);
        assert_eq!(listing.price, "Giá thỏa thuận");
        assert!(listing.href.is_none());
    }

    #[test]
    fn test_published_text_used_without_aria_label() {
        let body = r#"<span class="re__card-config-price">1 tỷ</span>
                      <span class="re__card-published-info-published-at"> Đăng 3 ngày trước </span>"#;
        let result = parse_listing_page(&page(&card(r#"prid="9""#, body))).unwrap();
        assert_eq!(result.listings[0].date_posted, "Đăng 3 ngày trước");
    }

    #[test]
    fn test_filters_non_organic_cards() {
        let ad = format!(
            r#"<div class="js__card js__card-ads" prid="500">{}</div>"#,
            full_body("500")
        );
        let zero_id = card(r#"prid="0""#, &full_body("0"));
        let similar = format!(
            r#"<div class="re__verified-similar-listing"><div>{}</div></div>"#,
            card(r#"prid="501""#, &full_body("501"))
        );
        let ad_link = card(
            r#"prid="502""#,
            r#"<a class="js__product-link-for-product-id js__ads-link" href="/x">
                 <span class="js__card-title">Quảng cáo</span></a>
               <span class="re__card-config-price">5 tỷ</span>"#,
        );
        let organic = card(r#"prid="503""#, &full_body("503"));

        let html = page(&format!("{ad}{zero_id}{similar}{ad_link}{organic}"));
        let result = parse_listing_page(&html).unwrap();

        assert_eq!(result.cards_seen, 5);
        assert_eq!(result.rejected, 4);
        let ids: Vec<_> = result.listings.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["503"]);
    }

    #[test]
    fn test_placeholder_cards_are_dropped() {
        let title_only = card(
            r#"prid="1""#,
            r#"<span class="js__card-title">Chỉ có tiêu đề</span>"#,
        );
        let location_only = card(
            r#"prid="2""#,
            r#"<div class="re__card-location"><span>Hà Đông</span></div>"#,
        );
        let result = parse_listing_page(&page(&format!("{title_only}{location_only}"))).unwrap();
        assert_eq!(result.cards_seen, 2);
        assert!(result.listings.is_empty());
    }

    #[test]
    fn test_preserves_card_order() {
        let cards: String = ["11", "12", "13"]
            .iter()
            .map(|id| card(&format!(r#"prid="{id}""#), &full_body(id)))
            .collect();
        let result = parse_listing_page(&page(&cards)).unwrap();
        let ids: Vec<_> = result.listings.iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, vec!["11", "12", "13"]);
    }

    #[test]
    fn test_no_results_signatures() {
        let phrase = Document {
            html: format!("<html><body><p>{}</p></body></html>", NO_RESULTS_PHRASE),
            ..Document::default()
        };
        let error_block = Document {
            html: r#"<html><body><div class="error-content">Oops</div></body></html>"#.to_string(),
            ..Document::default()
        };
        let not_found = Document {
            title: "404 - Không tìm thấy trang".to_string(),
            ..Document::default()
        };
        let normal = Document {
            title: "Bán căn hộ chung cư".to_string(),
            html: page(""),
            ..Document::default()
        };

        let encoded = Document {
            html: "<html><body><p>Kh&ocirc;ng c&oacute; k&#7871;t qu&#7843; n&agrave;o ph&ugrave; h&#7907;p</p></body></html>"
                .to_string(),
            ..Document::default()
        };

        assert!(is_no_results(&phrase));
        assert!(is_no_results(&encoded));
        assert!(is_no_results(&error_block));
        assert!(is_no_results(&not_found));
        assert!(!is_no_results(&normal));
    }
}
