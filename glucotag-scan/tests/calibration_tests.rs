//! Calibration engine tests, including candidates drawn from the scan log

mod helpers;

use glucotag_common::reading::keys;
use glucotag_common::Diagnostics;
use glucotag_scan::calibration::{Calibration, CalibrationEngine, CalibrationReferencePoint};
use glucotag_scan::decoder::decode;
use glucotag_scan::scan_log::ScanLogStore;
use helpers::sensor_image;
use tempfile::TempDir;

fn point(raw: i64, official: f64) -> CalibrationReferencePoint {
    CalibrationReferencePoint::new(raw, Some(official))
}

#[tokio::test]
async fn test_identity_fit_from_two_points() {
    let dir = TempDir::new().unwrap();
    let engine = CalibrationEngine::open(dir.path().join("calibration.json")).await;

    let fitted = engine
        .recompute(&[point(100, 100.0), point(200, 200.0)])
        .await
        .unwrap()
        .unwrap();
    assert!((fitted.slope - 1.0).abs() < 1e-9);
    assert!(fitted.intercept.abs() < 1e-9);
    assert!(fitted.is_calibrated);
    assert_eq!(engine.current().await, fitted);
}

#[tokio::test]
async fn test_too_few_eligible_points_leave_record_unchanged() {
    let dir = TempDir::new().unwrap();
    let engine = CalibrationEngine::open(dir.path().join("calibration.json")).await;
    engine
        .recompute(&[point(1000, 100.0), point(2000, 200.0)])
        .await
        .unwrap();
    let before = engine.current().await;

    let points = [
        point(1500, 150.0),
        CalibrationReferencePoint::new(1800, None),
        CalibrationReferencePoint::new(1900, Some(f64::NAN)),
    ];
    assert_eq!(engine.recompute(&points).await.unwrap(), None);
    assert_eq!(engine.current().await, before);
}

#[tokio::test]
async fn test_reset_is_idempotent_and_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration.json");
    let engine = CalibrationEngine::open(path.clone()).await;
    engine
        .recompute(&[point(1000, 90.0), point(2000, 210.0)])
        .await
        .unwrap();

    assert_eq!(engine.reset().await.unwrap(), Calibration::default());
    assert_eq!(engine.reset().await.unwrap(), Calibration::default());
    assert_eq!(CalibrationEngine::load(&path).await, Calibration::default());
}

#[tokio::test]
async fn test_fitted_calibration_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration.json");
    let fitted = CalibrationEngine::open(path.clone())
        .await
        .recompute(&[point(1000, 110.0), point(2000, 210.0)])
        .await
        .unwrap()
        .unwrap();

    let reopened = CalibrationEngine::open(path).await;
    assert_eq!(reopened.current().await, fitted);
}

#[tokio::test]
async fn test_candidates_pair_with_official_readings() {
    let dir = TempDir::new().unwrap();
    let store = ScanLogStore::new(dir.path().join("ScanLogs"));

    // A decoded scan records both raw16 and the masked value
    let image = sensor_image(0x2000 | 1000);
    let decoded = decode(image.blocks(), &Calibration::default());
    store.append(image.blocks(), &decoded.diagnostics).await.unwrap();

    // Older tools only wrote raw16
    let mut legacy = Diagnostics::new();
    legacy.insert(keys::RAW16, 2000);
    store.append(image.blocks(), &legacy).await.unwrap();

    // Entries without any raw value are not offered
    store.append(image.blocks(), &Diagnostics::new()).await.unwrap();

    let candidates = store.reference_candidates(8).await.unwrap();
    let mut raws: Vec<i64> = candidates.iter().map(|c| c.raw_value).collect();
    raws.sort_unstable();
    assert_eq!(raws, vec![1000, 2000]);

    let engine = CalibrationEngine::open(dir.path().join("calibration.json")).await;
    let points: Vec<CalibrationReferencePoint> = candidates
        .iter()
        .map(|c| point(c.raw_value, c.raw_value as f64 / 10.0 + 5.0))
        .collect();
    let fitted = engine.recompute(&points).await.unwrap().unwrap();
    assert!((fitted.slope - 0.1).abs() < 1e-9);
    assert!((fitted.intercept - 5.0).abs() < 1e-9);
    assert!((fitted.apply(1500.0) - 155.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_candidate_limit() {
    let dir = TempDir::new().unwrap();
    let store = ScanLogStore::new(dir.path().join("ScanLogs"));
    let image = sensor_image(1200);
    let decoded = decode(image.blocks(), &Calibration::default());
    for _ in 0..5 {
        store.append(image.blocks(), &decoded.diagnostics).await.unwrap();
    }
    assert_eq!(store.reference_candidates(3).await.unwrap().len(), 3);
}
