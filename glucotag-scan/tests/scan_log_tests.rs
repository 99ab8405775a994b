//! Scan log persistence tests
//!
//! Records written by the pipeline must be readable back into the same blocks
//! and diagnostics, and must stay compatible with records written by other
//! tools (numeric and boolean diagnostic values).

mod helpers;

use chrono::{TimeZone, Utc};
use glucotag_common::reading::keys;
use glucotag_scan::calibration::Calibration;
use glucotag_scan::decoder::{decode, RawBlockSet};
use glucotag_scan::scan_log::{ScanLogRecord, ScanLogStore};
use glucotag_scan::tag::MemoryImage;
use glucotag_scan::Error;
use helpers::sensor_image;
use tempfile::TempDir;

fn store() -> (TempDir, ScanLogStore) {
    let dir = TempDir::new().unwrap();
    let store = ScanLogStore::new(dir.path().join("ScanLogs"));
    (dir, store)
}

#[tokio::test]
async fn test_record_round_trips_blocks_and_diagnostics() {
    let (_dir, store) = store();
    let image = sensor_image(1200);
    let reading = decode(image.blocks(), &Calibration::default());

    let id = store
        .append(image.blocks(), &reading.diagnostics)
        .await
        .unwrap();
    assert!(id.starts_with("scan_") && id.ends_with(".json"), "{}", id);

    let entry = store.load(&id).await.unwrap();
    assert_eq!(entry.id, id);
    assert_eq!(entry.block_count, 43);
    assert_eq!(&entry.blocks, image.blocks());
    assert_eq!(entry.diagnostics, reading.diagnostics);
}

#[tokio::test]
async fn test_file_layout_is_flat_json() {
    let (_dir, store) = store();
    let blocks = RawBlockSet::from(vec![vec![0xAB, 0x01], vec![]]);
    let mut diag = glucotag_common::Diagnostics::new();
    diag.insert(keys::RAW16, 4660);
    diag.insert(keys::PLAUSIBLE, false);
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();

    let id = store.append_at(ts, &blocks, &diag).await.unwrap();
    let text = std::fs::read_to_string(store.dir().join(&id)).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(json["blockCount"], 2);
    assert_eq!(json["blocks"][0]["index"], 0);
    assert_eq!(json["blocks"][0]["hex"], "AB01");
    assert_eq!(json["blocks"][1]["hex"], "");
    assert_eq!(json["raw16"], "4660");
    assert_eq!(json["plausible"], "false");
    assert!(json["timestamp"].as_str().unwrap().starts_with("2024-03-01T12:30:00"));
}

#[tokio::test]
async fn test_foreign_record_with_typed_values_loads() {
    let (_dir, store) = store();
    std::fs::create_dir_all(store.dir()).unwrap();
    let text = r#"{
        "timestamp": "2024-05-01T08:00:00Z",
        "blockCount": 2,
        "blocks": [{"index": 1, "hex": "0102"}, {"index": 0, "hex": "ff"}],
        "rawGlucoseMasked": 1180,
        "plausible": true,
        "nested": {"ignored": 1}
    }"#;
    std::fs::write(store.dir().join("scan_foreign.json"), text).unwrap();

    let entry = store.load("scan_foreign.json").await.unwrap();
    assert_eq!(entry.blocks.get(0), Some(&[0xFF][..]));
    assert_eq!(entry.blocks.get(1), Some(&[0x01, 0x02][..]));
    assert_eq!(entry.diagnostics.get(keys::RAW_GLUCOSE_MASKED), Some("1180"));
    assert_eq!(entry.diagnostics.get(keys::PLAUSIBLE), Some("true"));
    assert!(!entry.diagnostics.contains_key("nested"));
}

#[tokio::test]
async fn test_scan_log_json_feeds_simulated_image() {
    let (_dir, store) = store();
    let image = sensor_image(987);
    let id = store
        .append(image.blocks(), &glucotag_common::Diagnostics::new())
        .await
        .unwrap();

    let loaded = MemoryImage::load(&store.dir().join(&id)).unwrap();
    assert_eq!(loaded, image);
}

#[tokio::test]
async fn test_bad_ids_and_missing_entries() {
    let (_dir, store) = store();
    for id in ["", ".hidden.json", "../calibration.json", "a/b.json", "notes.txt"] {
        assert!(
            matches!(store.load(id).await, Err(Error::InvalidInput(_))),
            "{:?}",
            id
        );
    }
    assert!(matches!(
        store.load("scan_missing.json").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.delete("scan_missing.json").await,
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_record_orders_blocks_by_index() {
    let record: ScanLogRecord = serde_json::from_str(
        r#"{"timestamp":"2024-05-01T08:00:00Z","blockCount":3,
            "blocks":[{"index":2,"hex":"03"},{"index":0,"hex":"01"},{"index":1,"hex":"02"}]}"#,
    )
    .unwrap();
    let blocks = record.raw_blocks().unwrap();
    assert_eq!(blocks.hex_dump(), vec!["01", "02", "03"]);
}
