// medrec/src/checksum.rs
//!
//! Checksum Store: content-hash bookkeeping for incremental runs.
//!
//! The store is a JSON object mapping the SHA-256 hex digest of each processed
//! file to when it was processed and what it was renamed to. It is rewritten
//! as a whole after every successful processing step so an aborted run never
//! loses entries for files it already handled.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::record::TIMESTAMP_FORMAT;
use crate::utils::load_json;
use crate::Error;

/// Read buffer for hashing; bounds memory regardless of file size.
pub const CHUNK_SIZE: usize = 4096;

/// SHA-256 of a file's contents as lowercase hex.
pub fn checksum_file(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    /// `YYYY-MM-DD HH:MM:SS`; missing or garbled values mean "process again".
    #[serde(default)]
    pub processed_date: Option<String>,
    #[serde(default)]
    pub original_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_file: Option<String>,
}

impl ChecksumEntry {
    pub fn processed_at(&self) -> Option<NaiveDateTime> {
        self.processed_date
            .as_deref()
            .and_then(|date| NaiveDateTime::parse_from_str(date.trim(), TIMESTAMP_FORMAT).ok())
    }
}

/// Outcome of the skip-review policy for one checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    Skip { days_since: i64 },
    ProcessNew,
    ProcessStale { days_since: i64 },
    ProcessUnknownDate,
}

impl SkipDecision {
    pub fn should_skip(&self) -> bool {
        matches!(self, SkipDecision::Skip { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ChecksumStore {
    path: PathBuf,
    entries: BTreeMap<String, ChecksumEntry>,
}

impl ChecksumStore {
    /// Load the store, starting empty when the file is absent or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = if !path.exists() {
            tracing::info!(path = %path.display(), "No existing checksums file found, starting fresh");
            BTreeMap::new()
        } else {
            match load_json::<BTreeMap<String, ChecksumEntry>>(&path) {
                Ok(entries) => {
                    tracing::info!(count = entries.len(), "Loaded processed checksums");
                    entries
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Checksums file is malformed, starting fresh");
                    BTreeMap::new()
                }
            }
        };

        Self { path, entries }
    }

    /// Rewrite the whole file. Errors are fatal to the caller.
    pub fn save(&self) -> Result<(), Error> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::info!(count = self.entries.len(), path = %self.path.display(), "Saved checksums");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, checksum: &str) -> Option<&ChecksumEntry> {
        self.entries.get(checksum)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply the skip-review policy to `checksum` as of `now`.
    pub fn decide(&self, checksum: &str, now: NaiveDateTime, review_interval_days: i64) -> SkipDecision {
        let Some(entry) = self.entries.get(checksum) else {
            return SkipDecision::ProcessNew;
        };
        let Some(processed_at) = entry.processed_at() else {
            return SkipDecision::ProcessUnknownDate;
        };

        let days_since = (now - processed_at).num_days();
        if days_since < review_interval_days {
            SkipDecision::Skip { days_since }
        } else {
            SkipDecision::ProcessStale { days_since }
        }
    }

    /// Insert or refresh the entry for `checksum` in place.
    pub fn record_processed(&mut self, checksum: &str, original_file: &str, now: NaiveDateTime) {
        let entry = self
            .entries
            .entry(checksum.to_string())
            .or_insert_with(|| ChecksumEntry {
                processed_date: None,
                original_file: String::new(),
                processed_file: None,
            });
        entry.processed_date = Some(now.format(TIMESTAMP_FORMAT).to_string());
        entry.original_file = original_file.to_string();
        entry.processed_file = None;
    }

    /// Drop the entry so the next run processes the file again.
    pub fn forget(&mut self, checksum: &str) -> Option<ChecksumEntry> {
        self.entries.remove(checksum)
    }

    pub fn set_processed_file(&mut self, checksum: &str, processed_file: &str) {
        if let Some(entry) = self.entries.get_mut(checksum) {
            entry.processed_file = Some(processed_file.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_checksum_is_stable_and_content_sensitive() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.txt");
        let b = temp_dir.path().join("b.txt");
        fs::write(&a, b"Lab result 07/12/2022").unwrap();
        fs::write(&b, b"Lab result 07/12/2023").unwrap();

        let first = checksum_file(&a).unwrap();
        assert_eq!(first, checksum_file(&a).unwrap());
        assert_eq!(first.len(), 64);
        assert_ne!(first, checksum_file(&b).unwrap());
    }

    #[test]
    fn test_checksum_spans_multiple_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        let data = vec![7u8; CHUNK_SIZE * 3 + 17];
        fs::write(&path, &data).unwrap();

        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(checksum_file(&path).unwrap(), expected);
    }

    #[test]
    fn test_missing_or_malformed_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("processed_files.json");
        assert!(ChecksumStore::load(&path).is_empty());

        fs::write(&path, "{ not json").unwrap();
        assert!(ChecksumStore::load(&path).is_empty());
    }

    #[test]
    fn test_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data_files").join("processed_files.json");

        let mut store = ChecksumStore::load(&path);
        store.record_processed("abc123", "scan.pdf", at(2024, 5, 1));
        store.set_processed_file("abc123", "2024-04-30_visit_rossi_001.pdf");
        store.save().unwrap();

        let reloaded = ChecksumStore::load(&path);
        let entry = reloaded.get("abc123").unwrap();
        assert_eq!(entry.processed_date.as_deref(), Some("2024-05-01 12:00:00"));
        assert_eq!(entry.original_file, "scan.pdf");
        assert_eq!(
            entry.processed_file.as_deref(),
            Some("2024-04-30_visit_rossi_001.pdf")
        );

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["abc123"]["original_file"], "scan.pdf");
    }

    #[test]
    fn test_skip_review_interval() {
        let mut store = ChecksumStore::load("/nonexistent/processed_files.json");
        let processed = at(2024, 1, 1);
        store.record_processed("abc", "a.pdf", processed);

        let recent = store.decide("abc", processed + Duration::days(179), 180);
        assert_eq!(recent, SkipDecision::Skip { days_since: 179 });
        assert!(recent.should_skip());

        let stale = store.decide("abc", processed + Duration::days(180), 180);
        assert_eq!(stale, SkipDecision::ProcessStale { days_since: 180 });
        assert!(!stale.should_skip());

        assert_eq!(store.decide("other", processed, 180), SkipDecision::ProcessNew);
    }

    #[test]
    fn test_unparsable_date_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("processed_files.json");
        fs::write(
            &path,
            r#"{"abc": {"processed_date": "yesterday", "original_file": "a.pdf"},
                "def": {"original_file": "b.pdf"}}"#,
        )
        .unwrap();

        let store = ChecksumStore::load(&path);
        assert_eq!(store.len(), 2);
        assert_eq!(store.decide("abc", at(2024, 1, 1), 180), SkipDecision::ProcessUnknownDate);
        assert_eq!(store.decide("def", at(2024, 1, 1), 180), SkipDecision::ProcessUnknownDate);
    }

    #[test]
    fn test_reprocessing_updates_in_place() {
        let mut store = ChecksumStore::load("/nonexistent/processed_files.json");
        store.record_processed("abc", "a.pdf", at(2023, 1, 1));
        store.set_processed_file("abc", "old_001.pdf");
        store.record_processed("abc", "a-renamed.pdf", at(2024, 1, 1));

        assert_eq!(store.len(), 1);
        let entry = store.get("abc").unwrap();
        assert_eq!(entry.original_file, "a-renamed.pdf");
        assert_eq!(entry.processed_date.as_deref(), Some("2024-01-01 12:00:00"));
        assert!(entry.processed_file.is_none());
    }

    #[test]
    fn test_forgotten_checksum_is_processed_again() {
        let mut store = ChecksumStore::load("/nonexistent/processed_files.json");
        let processed = at(2024, 1, 1);
        store.record_processed("abc", "a.pdf", processed);
        assert!(store.decide("abc", processed, 180).should_skip());

        assert!(store.forget("abc").is_some());
        assert_eq!(store.decide("abc", processed, 180), SkipDecision::ProcessNew);
        assert!(store.forget("abc").is_none());
    }
}
