//! Merge stage: combines the district files into one normalised dataset.
//!
//! Prices are expressed in tỷ (10⁹ đồng), price per m² in triệu (10⁶ đồng)
//! and areas in m², so `price_per_area * area / 1000` is comparable with
//! `price` directly.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{ListingRecord, Partition, NOT_AVAILABLE};
use crate::store::{self, RecordStore};

pub const NEGOTIABLE_PRICE: &str = "Giá thỏa thuận";

/// Largest accepted gap, in tỷ, between the stated and the computed price.
pub const PRICE_TOLERANCE: f64 = 1.1;

/// Rows with at least this many empty cells are discarded.
const MAX_EMPTY_CELLS: usize = 3;

const UNSUPPORTED_AREA_UNITS: [&str; 3] = ["nghìn/m²", "tỉ/m²", "đồng/m²"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedListing {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Date Posted")]
    pub date_posted: String,
    #[serde(rename = "Product Title")]
    pub title: String,
    #[serde(rename = "Price")]
    pub price: f64,
    #[serde(rename = "Area")]
    pub area: f64,
    #[serde(rename = "Price per m²")]
    pub price_per_area: f64,
    /// Computed minus stated price.
    #[serde(rename = "calc price")]
    pub calc_price: f64,
    #[serde(rename = "Bedrooms")]
    pub bedrooms: String,
    #[serde(rename = "Toilets")]
    pub toilets: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Coordinates")]
    pub coordinates: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleaningReport {
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub rows_loaded: usize,
    pub dropped_sparse: usize,
    pub dropped_unit: usize,
    pub dropped_duplicates: usize,
    pub dropped_deviation: usize,
    pub rows_written: usize,
    pub output: Option<PathBuf>,
}

/// Row after unit parsing, before the deviation check.
#[derive(Debug, Clone)]
struct ParsedRow {
    record: ListingRecord,
    price: Option<f64>,
    area: Option<f64>,
    price_per_area: Option<f64>,
}

impl ParsedRow {
    fn identity(&self) -> String {
        let r = &self.record;
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{:?}\u{1f}{:?}\u{1f}{:?}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            r.id,
            r.date_posted,
            r.title,
            self.price,
            self.area,
            self.price_per_area,
            r.bedrooms,
            r.toilets,
            r.location,
            r.coordinates
        )
    }
}

fn is_empty_cell(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed == NOT_AVAILABLE
}

fn empty_cells(record: &ListingRecord) -> usize {
    [
        &record.id,
        &record.date_posted,
        &record.title,
        &record.price,
        &record.area,
        &record.price_per_area,
        &record.bedrooms,
        &record.toilets,
        &record.location,
        &record.coordinates,
    ]
    .iter()
    .filter(|v| is_empty_cell(v))
    .count()
}

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse().ok()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Price in tỷ. Negotiable prices map to -1.
pub fn parse_price(raw: &str) -> Option<f64> {
    if raw.contains(NEGOTIABLE_PRICE) {
        return Some(-1.0);
    }
    if raw.contains("tỷ") {
        return parse_decimal(&raw.replace("tỷ", ""));
    }
    if raw.contains("triệu") {
        return parse_decimal(&raw.replace("triệu", "")).map(|v| v / 1000.0);
    }
    raw.trim().parse().ok()
}

pub fn parse_area(raw: &str) -> Option<f64> {
    parse_decimal(&raw.replace("m²", ""))
}

/// Price per m² in triệu. `None` when the value cannot be read.
pub fn parse_price_per_area(raw: &str) -> Option<f64> {
    parse_decimal(&raw.replace("tr/m²", ""))
}

fn has_unsupported_unit(raw: &str) -> bool {
    UNSUPPORTED_AREA_UNITS.iter().any(|unit| raw.contains(unit))
}

/// Reads every district file that has data. Missing, empty and unreadable
/// files are skipped with a log line.
fn load_partitions(
    store: &RecordStore,
    partitions: &[Partition],
    report: &mut CleaningReport,
) -> Vec<ListingRecord> {
    let mut rows = Vec::new();

    for partition in partitions {
        let path = store.path_for(partition);
        if !path.is_file() {
            info!("File does not exist: {}", path.display());
            report.files_skipped += 1;
            continue;
        }

        if fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true) {
            info!("Skipping empty file (0 bytes): {}", path.display());
            report.files_skipped += 1;
            continue;
        }

        match store::read_records(&path) {
            Ok(records) if records.is_empty() => {
                info!("Skipping file with no data (but has headers): {}", path.display());
                report.files_skipped += 1;
            }
            Ok(records) => {
                info!("Loaded {} rows from: {}", records.len(), path.display());
                report.files_loaded += 1;
                rows.extend(records);
            }
            Err(e) => {
                warn!("Error reading {}: {}", path.display(), e);
                report.files_skipped += 1;
            }
        }
    }

    report.rows_loaded = rows.len();
    rows
}

/// Applies the cleaning rules to already loaded rows.
pub fn clean_records(records: Vec<ListingRecord>, report: &mut CleaningReport) -> Vec<CleanedListing> {
    let mut rows: Vec<(usize, ListingRecord)> = records
        .into_iter()
        .map(|r| (empty_cells(&r), r))
        .filter(|(empty, _)| *empty < MAX_EMPTY_CELLS)
        .collect();
    report.dropped_sparse = report.rows_loaded.saturating_sub(rows.len());

    // Complete rows first, then alphabetically by location with unknown
    // locations last.
    rows.sort_by(|(ea, a), (eb, b)| {
        ea.cmp(eb)
            .then_with(|| is_empty_cell(&a.location).cmp(&is_empty_cell(&b.location)))
            .then_with(|| a.location.cmp(&b.location))
    });

    let before_units = rows.len();
    let parsed: Vec<ParsedRow> = rows
        .into_iter()
        .map(|(_, record)| record)
        .filter(|record| !has_unsupported_unit(&record.price_per_area))
        .map(|record| ParsedRow {
            price: parse_price(&record.price),
            area: parse_area(&record.area),
            price_per_area: parse_price_per_area(&record.price_per_area),
            record,
        })
        .collect();
    report.dropped_unit = before_units - parsed.len();

    // A row repeated anywhere is dropped in every copy.
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    for row in &parsed {
        *occurrences.entry(row.identity()).or_default() += 1;
    }
    let before_dupes = parsed.len();
    let unique: Vec<ParsedRow> = parsed
        .into_iter()
        .filter(|row| occurrences.get(&row.identity()).copied() == Some(1))
        .collect();
    report.dropped_duplicates = before_dupes - unique.len();

    let before_deviation = unique.len();
    let cleaned: Vec<CleanedListing> = unique
        .into_iter()
        .filter_map(|row| {
            let price = row.price?;
            let area = row.area?;
            let price_per_area = row.price_per_area.unwrap_or(0.0);

            let computed = round_to(price_per_area * area / 1000.0, 2);
            let calc_price = round_to(computed - price, 3);
            let within = calc_price.abs() <= PRICE_TOLERANCE || calc_price == -1.0;
            if !within {
                return None;
            }

            let r = row.record;
            Some(CleanedListing {
                id: r.id,
                date_posted: r.date_posted,
                title: r.title,
                price,
                area,
                price_per_area,
                calc_price,
                bedrooms: r.bedrooms,
                toilets: r.toilets,
                location: r.location,
                coordinates: r.coordinates,
            })
        })
        .collect();
    report.dropped_deviation = before_deviation - cleaned.len();

    cleaned
}

pub fn write_cleaned(path: &Path, rows: &[CleanedListing]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut wtr = csv::Writer::from_writer(file);
    for row in rows {
        wtr.serialize(row).map_err(|e| StoreError::csv(path, e))?;
    }
    if rows.is_empty() {
        wtr.write_record([
            "Id",
            "Date Posted",
            "Product Title",
            "Price",
            "Area",
            "Price per m²",
            "calc price",
            "Bedrooms",
            "Toilets",
            "Location",
            "Coordinates",
        ])
        .map_err(|e| StoreError::csv(path, e))?;
    }
    wtr.flush().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Loads, cleans and writes the merged dataset to `output`.
pub fn merge_partitions(
    store: &RecordStore,
    partitions: &[Partition],
    output: &Path,
) -> Result<CleaningReport, StoreError> {
    let mut report = CleaningReport::default();
    let records = load_partitions(store, partitions, &mut report);

    if records.is_empty() {
        warn!("No valid data to process");
        return Ok(report);
    }

    let cleaned = clean_records(records, &mut report);
    write_cleaned(output, &cleaned)?;
    report.rows_written = cleaned.len();
    report.output = Some(output.to_path_buf());

    info!("✔ Merged {} files ({} rows)", report.files_loaded, report.rows_loaded);
    info!("✔ Removed {} rows with {} or more empty cells", report.dropped_sparse, MAX_EMPTY_CELLS);
    info!("✔ Removed {} rows priced per m² in unsupported units", report.dropped_unit);
    info!("✔ Removed {} duplicated rows", report.dropped_duplicates);
    info!("✔ Removed {} rows whose computed price deviates too much", report.dropped_deviation);
    info!("✔ Final data ({} rows) saved to {}", report.rows_written, output.display());

    Ok(report)
}
