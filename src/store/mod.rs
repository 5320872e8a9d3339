use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{ListingKey, ListingRecord, Partition, CSV_HEADERS};

/// Append-only CSV file per district under a common data directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    data_dir: PathBuf,
}

impl RecordStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, partition: &Partition) -> PathBuf {
        self.data_dir
            .join(format!("filtered_real_estate_listings_{}.csv", partition))
    }

    pub fn exists(&self, partition: &Partition) -> bool {
        self.path_for(partition).is_file()
    }

    /// Whether the district file holds at least its header row. A file cut
    /// short before its first flush is empty and does not count.
    pub fn has_header(&self, partition: &Partition) -> bool {
        fs::metadata(self.path_for(partition))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Scans the district file for a row with the given key. A missing file
    /// holds nothing, so the answer is `false`.
    pub fn contains(
        &self,
        partition: &Partition,
        id: &str,
        date_posted: &str,
    ) -> Result<bool, StoreError> {
        if !self.exists(partition) {
            return Ok(false);
        }

        for record in self.read_all(partition)? {
            if record.id == id && record.date_posted == date_posted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every key already persisted for the district, read once.
    pub fn load_keys(&self, partition: &Partition) -> Result<HashSet<ListingKey>, StoreError> {
        if !self.has_header(partition) {
            return Ok(HashSet::new());
        }

        let keys: HashSet<ListingKey> = self
            .read_all(partition)?
            .into_iter()
            .map(|record| (record.id, record.date_posted))
            .collect();

        debug!("Loaded {} existing keys for {}", keys.len(), partition);
        Ok(keys)
    }

    pub fn read_all(&self, partition: &Partition) -> Result<Vec<ListingRecord>, StoreError> {
        let path = self.path_for(partition);
        read_records(&path)
    }

    /// Writes `records` to the district file and flushes.
    ///
    /// With `is_first_page` the file is created (or truncated) and the header
    /// row written; otherwise rows are appended without a header, unless the
    /// file is still empty.
    pub fn append(
        &self,
        partition: &Partition,
        records: &[ListingRecord],
        is_first_page: bool,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| StoreError::io(&self.data_dir, e))?;

        let path = self.path_for(partition);
        let file = if is_first_page {
            File::create(&path)
        } else {
            OpenOptions::new().create(true).append(true).open(&path)
        }
        .map_err(|e| StoreError::io(&path, e))?;
        let empty = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|e| StoreError::io(&path, e))?;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_first_page || empty {
            wtr.write_record(CSV_HEADERS)
                .map_err(|e| StoreError::csv(&path, e))?;
        }

        for record in records {
            wtr.serialize(record).map_err(|e| StoreError::csv(&path, e))?;
        }

        wtr.flush().map_err(|e| StoreError::io(&path, e))?;
        info!(
            "💾 Wrote {} records to {}",
            records.len(),
            path.display()
        );
        Ok(())
    }
}

pub(crate) fn read_records(path: &Path) -> Result<Vec<ListingRecord>, StoreError> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| StoreError::csv(path, e))?;

    let mut records = Vec::new();
    for row in rdr.deserialize() {
        let record: ListingRecord = row.map_err(|e| StoreError::csv(path, e))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, date: &str) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            date_posted: date.to_string(),
            title: format!("Căn hộ {}", id),
            price: "2,1 tỷ".to_string(),
            area: "45 m²".to_string(),
            price_per_area: "46,67 tr/m²".to_string(),
            bedrooms: "1".to_string(),
            toilets: "1".to_string(),
            location: "Thanh Xuân, Hà Nội".to_string(),
            coordinates: "N/A".to_string(),
        }
    }

    #[test]
    fn test_contains_fails_open_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let district = Partition::new("thanh-xuan").unwrap();

        assert!(!store.exists(&district));
        assert!(!store.contains(&district, "1", "x").unwrap());
        assert!(store.load_keys(&district).unwrap().is_empty());
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let district = Partition::new("thanh-xuan").unwrap();

        store
            .append(&district, &[record("1", "01/10/2024")], true)
            .unwrap();
        store
            .append(&district, &[record("2", "02/10/2024")], false)
            .unwrap();

        let raw = fs::read_to_string(store.path_for(&district)).unwrap();
        let header_lines = raw.lines().filter(|l| l.starts_with("Id,")).count();
        assert_eq!(header_lines, 1);
        assert!(raw.starts_with(
            "Id,Date Posted,Product Title,Price,Area,Price per m²,Bedrooms,Toilets,Location,Coordinates"
        ));

        let rows = store.read_all(&district).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, "2");
    }

    #[test]
    fn test_first_page_overwrites_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let district = Partition::new("ba-dinh").unwrap();

        store
            .append(&district, &[record("1", "a"), record("2", "b")], true)
            .unwrap();
        store.append(&district, &[record("3", "c")], true).unwrap();

        let rows = store.read_all(&district).unwrap();
        assert_eq!(rows, vec![record("3", "c")]);
    }

    #[test]
    fn test_contains_matches_on_both_key_parts() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let district = Partition::new("dong-da").unwrap();

        store
            .append(&district, &[record("77", "Hôm nay")], true)
            .unwrap();

        assert!(store.contains(&district, "77", "Hôm nay").unwrap());
        assert!(!store.contains(&district, "77", "Hôm qua").unwrap());
        assert!(!store.contains(&district, "78", "Hôm nay").unwrap());

        let keys = store.load_keys(&district).unwrap();
        assert!(keys.contains(&("77".to_string(), "Hôm nay".to_string())));
    }

    #[test]
    fn test_empty_file_gets_header_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let district = Partition::new("hoang-mai").unwrap();
        fs::write(store.path_for(&district), "").unwrap();

        assert!(store.exists(&district));
        assert!(!store.has_header(&district));
        assert!(store.load_keys(&district).unwrap().is_empty());

        store.append(&district, &[record("8", "x")], false).unwrap();

        assert!(store.has_header(&district));
        assert_eq!(store.read_all(&district).unwrap(), vec![record("8", "x")]);
    }

    #[test]
    fn test_fields_with_commas_survive() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let district = Partition::new("cau-giay").unwrap();

        let mut row = record("5", "x");
        row.coordinates = "21.0367, 105.7825".to_string();
        store.append(&district, &[row.clone()], true).unwrap();

        assert_eq!(store.read_all(&district).unwrap(), vec![row]);
    }
}
