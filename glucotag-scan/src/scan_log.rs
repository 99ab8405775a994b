//! Append-only scan log
//!
//! Every completed acquisition attempt, successful or not, leaves one JSON
//! file under `ScanLogs/`. Entries are immutable: a new entry never replaces
//! an existing file, and only operator actions (`delete`, `purge_all`)
//! remove them.
//!
//! File format:
//! ```json
//! {
//!   "timestamp": "2024-05-01T12:00:00Z",
//!   "blockCount": 43,
//!   "blocks": [{"index": 0, "hex": "0000102703000000"}, ...],
//!   "raw16": "1200",
//!   "verificationSucceeded": "true"
//! }
//! ```
//! Diagnostic keys sit at the top level next to the three fixed fields.

use crate::decoder::RawBlockSet;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use glucotag_common::events::{EventBus, ScanEvent};
use glucotag_common::reading::keys;
use glucotag_common::Diagnostics;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts at finding an unused file name before giving up
const NAME_ATTEMPTS: usize = 4;

/// Default number of entries offered as calibration candidates
pub const DEFAULT_CANDIDATE_LIMIT: usize = 8;

/// Top-level record fields; diagnostics never shadow them
const RESERVED_KEYS: [&str; 3] = ["timestamp", keys::BLOCK_COUNT, "blocks"];

/// One block in a persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedBlock {
    pub index: usize,
    pub hex: String,
}

/// On-disk scan log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanLogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "blockCount")]
    pub block_count: usize,
    pub blocks: Vec<LoggedBlock>,
    /// Diagnostic keys, flattened at top level
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ScanLogRecord {
    pub fn new(timestamp: DateTime<Utc>, blocks: &RawBlockSet, diagnostics: &Diagnostics) -> Self {
        let logged = blocks
            .hex_dump()
            .into_iter()
            .enumerate()
            .map(|(index, hex)| LoggedBlock { index, hex })
            .collect();
        let extra = diagnostics
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(k))
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Self {
            timestamp,
            block_count: blocks.len(),
            blocks: logged,
            extra,
        }
    }

    /// Blocks in index order
    pub fn raw_blocks(&self) -> std::result::Result<RawBlockSet, hex::FromHexError> {
        let mut ordered: Vec<&LoggedBlock> = self.blocks.iter().collect();
        ordered.sort_by_key(|b| b.index);
        let lines: Vec<&str> = ordered.iter().map(|b| b.hex.as_str()).collect();
        RawBlockSet::from_hex(&lines)
    }

    /// Diagnostics as strings; numbers and booleans written by other tools
    /// are stringified, nested values are skipped
    pub fn diagnostics(&self) -> Diagnostics {
        let mut diag = Diagnostics::new();
        diag.insert(keys::BLOCK_COUNT, self.block_count);
        for (key, value) in &self.extra {
            match value {
                Value::String(s) => diag.insert(key.as_str(), s),
                Value::Number(n) => diag.insert(key.as_str(), n),
                Value::Bool(b) => diag.insert(key.as_str(), b),
                _ => {}
            }
        }
        diag
    }
}

/// A loaded entry with its id (file name)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub block_count: usize,
    pub blocks: RawBlockSet,
    pub diagnostics: Diagnostics,
}

/// A recent entry offered for pairing with an official reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceCandidate {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub raw_value: i64,
    /// Glucose the scan published, when verification succeeded
    pub glucose: Option<f64>,
}

/// Directory-backed scan log store
#[derive(Clone)]
pub struct ScanLogStore {
    dir: PathBuf,
    events: Option<EventBus>,
}

impl ScanLogStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, events: None }
    }

    /// Publish `ScanLogAppended` on this bus after every append
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist an entry timestamped now; returns its id
    pub async fn append(&self, blocks: &RawBlockSet, diagnostics: &Diagnostics) -> Result<String> {
        self.append_at(Utc::now(), blocks, diagnostics).await
    }

    pub async fn append_at(
        &self,
        timestamp: DateTime<Utc>,
        blocks: &RawBlockSet,
        diagnostics: &Diagnostics,
    ) -> Result<String> {
        let record = ScanLogRecord::new(timestamp, blocks, diagnostics);
        let json = serde_json::to_vec_pretty(&record)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Persistence(format!("create {}: {}", self.dir.display(), e)))?;

        let stamp = glucotag_common::time::file_stamp(&timestamp);
        let id = self.write_new(&stamp, &json).await?;

        info!("Persisted scan to {}", id);
        if let Some(events) = &self.events {
            events.emit_lossy(ScanEvent::ScanLogAppended {
                entry_id: id.clone(),
                timestamp,
            });
        }
        Ok(id)
    }

    /// Write to a hidden temp file, then link it into place
    ///
    /// `hard_link` fails if the target exists, so an entry is never
    /// overwritten even if two writers pick the same name.
    async fn write_new(&self, stamp: &str, json: &[u8]) -> Result<String> {
        for _ in 0..NAME_ATTEMPTS {
            let suffix = Uuid::new_v4().simple().to_string();
            let id = format!("scan_{}_{}.json", stamp, &suffix[..8]);
            let tmp = self.dir.join(format!(".{}.tmp", id));
            let target = self.dir.join(&id);

            if let Err(e) = tokio::fs::write(&tmp, json).await {
                discard_temp(&tmp).await;
                return Err(Error::Persistence(format!("write {}: {}", tmp.display(), e)));
            }

            let linked = tokio::fs::hard_link(&tmp, &target).await;
            discard_temp(&tmp).await;

            match linked {
                Ok(()) => return Ok(id),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Scan log name {} taken, retrying", id);
                    continue;
                }
                Err(e) => {
                    return Err(Error::Persistence(format!("link {}: {}", target.display(), e)));
                }
            }
        }
        Err(Error::Persistence("no unused scan log name found".to_string()))
    }

    /// Entry ids, newest first by modification time
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: Vec<(SystemTime, String)> = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping scan log {}: {}", name, e);
                    continue;
                }
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(found.into_iter().map(|(_, name)| name).collect())
    }

    /// Parse one entry
    pub async fn load(&self, id: &str) -> Result<ScanLogEntry> {
        let path = self.path_for(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("scan log {}", id)));
            }
            Err(e) => return Err(e.into()),
        };

        let malformed = |reason: String| Error::MalformedLog {
            id: id.to_string(),
            reason,
        };
        let record: ScanLogRecord =
            serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?;
        let blocks = record.raw_blocks().map_err(|e| malformed(e.to_string()))?;

        Ok(ScanLogEntry {
            id: id.to_string(),
            timestamp: record.timestamp,
            block_count: record.block_count,
            diagnostics: record.diagnostics(),
            blocks,
        })
    }

    /// Operator action: remove one entry
    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted scan log {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("scan log {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Operator action: remove every entry; returns how many were removed
    pub async fn purge_all(&self) -> Result<usize> {
        let mut removed = 0;
        for id in self.list().await? {
            match self.delete(&id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to delete scan log {}: {}", id, e),
            }
        }
        info!("Purged {} scan logs", removed);
        Ok(removed)
    }

    /// Most recent entries that carry a raw value
    ///
    /// Prefers `rawGlucoseMasked` and falls back to `raw16`. Malformed
    /// entries are skipped with a warning.
    pub async fn reference_candidates(&self, limit: usize) -> Result<Vec<ReferenceCandidate>> {
        let mut candidates = Vec::new();
        for id in self.list().await?.into_iter().take(limit) {
            let entry = match self.load(&id).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping scan log {} for calibration: {}", id, e);
                    continue;
                }
            };
            let raw_value = entry
                .diagnostics
                .get_parsed::<i64>(keys::RAW_GLUCOSE_MASKED)
                .or_else(|| entry.diagnostics.get_parsed::<i64>(keys::RAW16));
            if let Some(raw_value) = raw_value {
                candidates.push(ReferenceCandidate {
                    glucose: entry.diagnostics.get_parsed(keys::GLUCOSE_MGDL),
                    id: entry.id,
                    timestamp: entry.timestamp,
                    raw_value,
                });
            }
        }
        Ok(candidates)
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(id))
    }
}

/// Best-effort removal of a temp file that may or may not exist
async fn discard_temp(tmp: &Path) {
    match tokio::fs::remove_file(tmp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp file {}: {}", tmp.display(), e),
    }
}

/// Ids are bare file names
fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\'])
        && !id.contains("..")
        && id.ends_with(".json");
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid scan log id: {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn blocks() -> RawBlockSet {
        RawBlockSet::from(vec![vec![0x00, 0x11, 0xAA], vec![0xFF; 8]])
    }

    #[test]
    fn test_record_layout() {
        let mut diag = Diagnostics::new();
        diag.insert(keys::RAW16, 1200);
        let ts = Utc::now();
        let value = serde_json::to_value(ScanLogRecord::new(ts, &blocks(), &diag)).unwrap();
        assert_eq!(value["blockCount"], 2);
        assert_eq!(value["blocks"][0]["index"], 0);
        assert_eq!(value["blocks"][0]["hex"], "0011AA");
        assert_eq!(value["raw16"], "1200");
    }

    #[test]
    fn test_diagnostics_never_shadow_fixed_fields() {
        let mut diag = Diagnostics::new();
        diag.insert(keys::BLOCK_COUNT, 2);
        diag.insert("blocks", "bogus");
        let record = ScanLogRecord::new(Utc::now(), &blocks(), &diag);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json.matches("\"blockCount\"").count(), 1);

        let back: ScanLogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.diagnostics().get(keys::BLOCK_COUNT), Some("2"));
        assert!(back.diagnostics().get("blocks").is_none());
    }

    #[test]
    fn test_numeric_diagnostics_are_stringified() {
        let json = r#"{"timestamp":"2024-05-01T12:00:00Z","blockCount":0,"blocks":[],
                       "raw16":1200,"plausible":true,"nested":{"a":1}}"#;
        let record: ScanLogRecord = serde_json::from_str(json).unwrap();
        let diag = record.diagnostics();
        assert_eq!(diag.get("raw16"), Some("1200"));
        assert_eq!(diag.get("plausible"), Some("true"));
        assert!(!diag.contains_key("nested"));
    }

    #[test]
    fn test_id_validation() {
        assert!(validate_id("scan_2024-05-01T12-00-00Z_abcd1234.json").is_ok());
        assert!(validate_id("../calibration.json").is_err());
        assert!(validate_id("sub/scan.json").is_err());
        assert!(validate_id(".hidden.json").is_err());
        assert!(validate_id("scan.txt").is_err());
        assert!(validate_id("").is_err());
    }

    #[tokio::test]
    async fn test_append_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = ScanLogStore::new(dir.path().join("ScanLogs"));
        let id = store.append(&blocks(), &Diagnostics::new()).await.unwrap();
        assert!(id.starts_with("scan_") && id.ends_with(".json"));

        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![id]);
    }

    #[tokio::test]
    async fn test_unwritable_directory_reports_persistence() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("ScanLogs");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = ScanLogStore::new(blocker.clone());

        let result = store.append(&blocks(), &Diagnostics::new()).await;
        assert!(matches!(result, Err(Error::Persistence(_))), "{:?}", result);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["ScanLogs".to_string()]);
        assert_eq!(std::fs::read(&blocker).unwrap(), b"not a directory");
    }

    #[tokio::test]
    async fn test_discard_temp_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join(".scan_x.json.tmp");
        discard_temp(&tmp).await;

        std::fs::write(&tmp, b"{}").unwrap();
        discard_temp(&tmp).await;
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn test_same_timestamp_gets_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let store = ScanLogStore::new(dir.path().to_path_buf());
        let ts = Utc::now();
        let a = store.append_at(ts, &blocks(), &Diagnostics::new()).await.unwrap();
        let b = store.append_at(ts, &blocks(), &Diagnostics::new()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_skips_hidden_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = ScanLogStore::new(dir.path().to_path_buf());
        store.append(&blocks(), &Diagnostics::new()).await.unwrap();
        std::fs::write(dir.path().join(".scan_partial.json.tmp"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ScanLogStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_malformed() {
        let dir = TempDir::new().unwrap();
        let store = ScanLogStore::new(dir.path().to_path_buf());
        std::fs::write(dir.path().join("scan_bad.json"), "{\"timestamp\": 5}").unwrap();
        assert!(matches!(
            store.load("scan_bad.json").await,
            Err(Error::MalformedLog { .. })
        ));
        assert!(matches!(
            store.load("scan_missing.json").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_and_purge() {
        let dir = TempDir::new().unwrap();
        let store = ScanLogStore::new(dir.path().to_path_buf());
        let first = store.append(&blocks(), &Diagnostics::new()).await.unwrap();
        store.append(&blocks(), &Diagnostics::new()).await.unwrap();
        store.append(&blocks(), &Diagnostics::new()).await.unwrap();

        store.delete(&first).await.unwrap();
        assert!(matches!(store.delete(&first).await, Err(Error::NotFound(_))));
        assert_eq!(store.purge_all().await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_emits_event() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let store = ScanLogStore::new(dir.path().to_path_buf()).with_events(bus);
        let id = store.append(&blocks(), &Diagnostics::new()).await.unwrap();
        match rx.recv().await.unwrap() {
            ScanEvent::ScanLogAppended { entry_id, .. } => assert_eq!(entry_id, id),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
