//! Persistence of finished records, keyed by deal id and creation time.
//!
//! Records are immutable once stored: every save creates a new entry, and `load`
//! returns the most recent one.

use crate::error::{DealRecordError, Result};
use crate::schema::DealRecord;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

const MAX_DEAL_ID_LEN: usize = 128;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A persisted record together with its identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct StoredRecord {
    pub deal_id: String,
    pub created_at: DateTime<Utc>,
    pub record: DealRecord,
}

pub trait RecordStore: Send + Sync {
    fn save(&self, deal_id: &str, record: &DealRecord, created_at: DateTime<Utc>) -> Result<()>;

    /// The most recently created record for the deal.
    fn load(&self, deal_id: &str) -> Result<StoredRecord>;
}

/// Rejects ids that could escape the store directory or collide with temp files.
pub fn validate_deal_id(deal_id: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(DealRecordError::InvalidDealId(format!(
            "'{}' {}",
            deal_id, reason
        )))
    };

    if deal_id.trim().is_empty() {
        return invalid("is empty");
    }
    if deal_id.len() > MAX_DEAL_ID_LEN {
        return invalid("is too long");
    }
    if deal_id.starts_with('.') {
        return invalid("starts with a dot");
    }
    if deal_id
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control())
    {
        return invalid("contains a path separator or control character");
    }
    Ok(())
}

/// One JSON file per save, named `<deal_id>_<unix_millis>.json`.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(deal_id: &str, created_at: DateTime<Utc>) -> String {
        format!("{}_{}.json", deal_id, created_at.timestamp_millis())
    }

    /// Unique per process and per save, so concurrent writers never share a temp file.
    fn temp_name(file_name: &str) -> String {
        format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Stored versions of a deal as `(unix_millis, path)`, oldest first.
    pub fn versions(&self, deal_id: &str) -> Result<Vec<(i64, PathBuf)>> {
        validate_deal_id(deal_id)?;
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((id, millis)) = stem.rsplit_once('_') else {
                continue;
            };
            if id != deal_id {
                continue;
            }
            if let Ok(millis) = millis.parse::<i64>() {
                versions.push((millis, path));
            }
        }
        versions.sort();
        Ok(versions)
    }
}

impl RecordStore for JsonFileStore {
    fn save(&self, deal_id: &str, record: &DealRecord, created_at: DateTime<Utc>) -> Result<()> {
        validate_deal_id(deal_id)?;

        let stored = StoredRecord {
            deal_id: deal_id.to_string(),
            created_at,
            record: record.clone(),
        };
        let json = serde_json::to_string_pretty(&stored)?;

        let file_name = Self::file_name(deal_id, created_at);
        let final_path = self.root.join(&file_name);
        let temp_path = self.root.join(Self::temp_name(&file_name));

        let written = write_synced(&temp_path, json.as_bytes())
            .and_then(|()| fs::rename(&temp_path, &final_path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        info!("Saved record for deal {} to {}", deal_id, final_path.display());
        Ok(())
    }

    fn load(&self, deal_id: &str) -> Result<StoredRecord> {
        let versions = self.versions(deal_id)?;
        let (millis, path) = versions
            .last()
            .ok_or_else(|| DealRecordError::RecordNotFound(deal_id.to_string()))?;

        debug!("Loading deal {} version {}", deal_id, millis);
        let raw = fs::read_to_string(path)?;
        let stored: StoredRecord = serde_json::from_str(&raw)?;
        Ok(stored)
    }
}

/// Writes and flushes to disk, so a rename never publishes a partially written file.
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// In-process store, mostly for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<StoredRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .map(|records| records.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> DealRecordError {
    DealRecordError::IoError(std::io::Error::other("record store lock poisoned"))
}

impl RecordStore for MemoryStore {
    fn save(&self, deal_id: &str, record: &DealRecord, created_at: DateTime<Utc>) -> Result<()> {
        validate_deal_id(deal_id)?;
        let mut records = self.records.write().map_err(poisoned)?;
        let versions = records.entry(deal_id.to_string()).or_default();
        versions.push(StoredRecord {
            deal_id: deal_id.to_string(),
            created_at,
            record: record.clone(),
        });
        versions.sort_by_key(|stored| stored.created_at);
        Ok(())
    }

    fn load(&self, deal_id: &str) -> Result<StoredRecord> {
        validate_deal_id(deal_id)?;
        let records = self.records.read().map_err(poisoned)?;
        records
            .get(deal_id)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| DealRecordError::RecordNotFound(deal_id.to_string()))
    }
}

/// Millisecond timestamp used in stored file names, as a UTC datetime.
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> DealRecord {
        let mut record = DealRecord::default();
        record.header.company_name = Some(name.to_string());
        record
    }

    fn at(millis: i64) -> DateTime<Utc> {
        timestamp_from_millis(millis).unwrap()
    }

    #[test]
    fn test_deal_id_validation() {
        assert!(validate_deal_id("deal-42").is_ok());
        assert!(validate_deal_id("acme_2024").is_ok());
        for bad in ["", "   ", "../etc", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(validate_deal_id(bad), Err(DealRecordError::InvalidDealId(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_file_store_returns_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        store.save("deal-1", &record("First"), at(1_700_000_000_000)).unwrap();
        store.save("deal-1", &record("Second"), at(1_700_000_500_000)).unwrap();
        store.save("deal-10", &record("Other"), at(1_800_000_000_000)).unwrap();

        let loaded = store.load("deal-1").unwrap();
        assert_eq!(loaded.record.header.company_name.as_deref(), Some("Second"));
        assert_eq!(loaded.created_at, at(1_700_000_500_000));
        assert_eq!(store.versions("deal-1").unwrap().len(), 2);

        let expected = dir.path().join("deal-1_1700000500000.json");
        assert!(expected.exists());
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested")).unwrap();
        store.save("deal", &record("Acme"), at(1)).unwrap();

        let names: Vec<String> = fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["deal_1.json"]);
    }

    #[test]
    fn test_temp_names_are_unique() {
        let first = JsonFileStore::temp_name("deal_1.json");
        let second = JsonFileStore::temp_name("deal_1.json");
        assert_ne!(first, second);
        assert!(first.starts_with(".deal_1.json."));
        assert!(first.ends_with(".tmp"));
    }

    #[test]
    fn test_concurrent_saves_of_same_version_stay_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.save("deal", &record(&format!("Writer {}", n)), at(5)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = store.load("deal").unwrap();
        assert!(loaded
            .record
            .header
            .company_name
            .unwrap()
            .starts_with("Writer "));
        let names: Vec<String> = fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["deal_5.json"]);
    }

    #[test]
    fn test_missing_deal_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load("nobody"),
            Err(DealRecordError::RecordNotFound(_))
        ));
        assert!(matches!(
            store.load("../x"),
            Err(DealRecordError::InvalidDealId(_))
        ));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.save("d", &record("Later"), at(20)).unwrap();
        store.save("d", &record("Earlier"), at(10)).unwrap();

        let loaded = store.load("d").unwrap();
        assert_eq!(loaded.record.header.company_name.as_deref(), Some("Later"));
        assert_eq!(store.len(), 2);
        assert!(store.load("e").is_err());
    }
}
