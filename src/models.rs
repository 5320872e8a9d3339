use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// Placeholder written for any field that could not be extracted.
pub const NOT_AVAILABLE: &str = "N/A";

/// Column order of every per-district file.
pub const CSV_HEADERS: [&str; 10] = [
    "Id",
    "Date Posted",
    "Product Title",
    "Price",
    "Area",
    "Price per m²",
    "Bedrooms",
    "Toilets",
    "Location",
    "Coordinates",
];

/// Hanoi districts scraped when none are given explicitly.
pub const DEFAULT_DISTRICTS: [&str; 12] = [
    "thanh-xuan",
    "ba-dinh",
    "cau-giay",
    "nam-tu-liem",
    "bac-tu-liem",
    "hai-ba-trung",
    "hoan-kiem",
    "dong-da",
    "ha-dong",
    "hoang-mai",
    "long-bien",
    "tay-ho",
];

/// One row of a district file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Date Posted")]
    pub date_posted: String,
    #[serde(rename = "Product Title")]
    pub title: String,
    #[serde(rename = "Price")]
    pub price: String,
    #[serde(rename = "Area")]
    pub area: String,
    #[serde(rename = "Price per m²")]
    pub price_per_area: String,
    #[serde(rename = "Bedrooms")]
    pub bedrooms: String,
    #[serde(rename = "Toilets")]
    pub toilets: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Coordinates")]
    pub coordinates: String,
}

/// Identity of a listing for deduplication.
pub type ListingKey = (String, String);

impl ListingRecord {
    pub fn key(&self) -> ListingKey {
        (self.id.clone(), self.date_posted.clone())
    }
}

/// A listing as read from its card, before the detail page has been visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRecord {
    pub id: String,
    pub date_posted: String,
    pub title: String,
    pub price: String,
    pub area: String,
    pub price_per_area: String,
    pub bedrooms: String,
    pub toilets: String,
    pub location: String,
    /// Relative link to the detail page, if the card carries one.
    pub href: Option<String>,
}

impl PartialRecord {
    pub fn key(&self) -> ListingKey {
        (self.id.clone(), self.date_posted.clone())
    }

    pub fn with_coordinates(self, coordinates: String) -> ListingRecord {
        ListingRecord {
            id: self.id,
            date_posted: self.date_posted,
            title: self.title,
            price: self.price,
            area: self.area,
            price_per_area: self.price_per_area,
            bedrooms: self.bedrooms,
            toilets: self.toilets,
            location: self.location,
            coordinates,
        }
    }
}

/// A district slug. Doubles as URL path segment and file name component,
/// so only lowercase ASCII letters, digits and `-` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition(String);

impl Partition {
    pub fn new(slug: impl Into<String>) -> Result<Self, ScrapeError> {
        let slug = slug.into();
        let valid = !slug.is_empty()
            && !slug.starts_with('-')
            && !slug.ends_with('-')
            && slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        if valid {
            Ok(Self(slug))
        } else {
            Err(ScrapeError::InvalidPartition(slug))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn defaults() -> Vec<Partition> {
        DEFAULT_DISTRICTS
            .iter()
            .map(|slug| Partition(slug.to_string()))
            .collect()
    }
}

impl FromStr for Partition {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.trim())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
