//! Distribution Scenario Tests
//!
//! Runs complete assemblies into temporary directories and checks the
//! published tree: batch archives of one hour, index files, day
//! aggregates and the JSON key source.

mod fixtures;

use std::fs;
use std::path::Path;

use exposure_dist::AssemblyState;
use exposure_keys::{DiagnosisKeyBuilder, JsonFileKeySource};
use exposure_protocol::{ReportType, TekSignatureList};
use fixtures::*;
use prost::Message;
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Batches of one hour
// =============================================================================

#[test]
fn test_ten_keys_split_into_three_batches() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");

    let report = run(config(&output), crypto(), de_keys(10, 29), utc(2, 6, 0));
    assert_eq!(report.state, AssemblyState::Done);
    assert_eq!(report.keys_loaded, 10);

    let hour = hour_dir(&output, "DE", "1970-01-02", 5);
    assert_eq!(
        archive_names(&hour),
        vec!["index-1", "index-2", "index-3"]
    );

    let mut counts = Vec::new();
    let mut published = Vec::new();
    for (num, name) in ["index-1", "index-2", "index-3"].iter().enumerate() {
        let path = hour.join(name);
        assert!(hour.join(format!("{}.checksum", name)).is_file());

        let export = read_export(&path);
        assert_eq!(export.batch_num, Some(num as i32 + 1));
        assert_eq!(export.batch_size, Some(3));
        assert_eq!(export.region.as_deref(), Some("DE"));
        assert_eq!(export.start_timestamp, Some(86_400 + 5 * 3_600));
        assert_eq!(export.end_timestamp, Some(86_400 + 6 * 3_600));
        counts.push(export.keys.len());
        published.extend(export.keys.into_iter().map(|k| k.key_data.unwrap()));

        let entries = archive_entries(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0, "export.sig");
        let signatures = TekSignatureList::decode(entries[1].1.as_slice()).unwrap();
        assert_eq!(signatures.signatures.len(), 1);
        assert_eq!(signatures.signatures[0].batch_num, Some(num as i32 + 1));
        assert_eq!(signatures.signatures[0].batch_size, Some(3));
    }
    assert_eq!(counts, vec![4, 4, 2]);

    // Concatenated batches are the keys in key data order.
    let mut expected: Vec<Vec<u8>> = de_keys(10, 29)
        .iter()
        .map(|k| k.key_data().to_vec())
        .collect();
    expected.sort();
    assert_eq!(published, expected);
}

#[test]
fn test_eu_package_carries_same_keys() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");

    run(config(&output), crypto(), de_keys(3, 29), utc(2, 6, 0));

    let export = read_export(&hour_dir(&output, "EUR", "1970-01-02", 5).join("index"));
    assert_eq!(export.region.as_deref(), Some("EUR"));
    assert_eq!(export.keys.len(), 3);
}

#[test]
fn test_keys_of_current_hour_withheld() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");

    run(config(&output), crypto(), de_keys(3, 29), utc(2, 5, 59));

    assert_eq!(
        read_index(&country_dir(&output, "DE").join("date/index")),
        json!([])
    );
}

#[test]
fn test_foreign_key_without_visited_countries_published_by_its_origin() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");
    let mut config = config(&output);
    config.api.supported_countries = vec!["DE".to_string(), "FR".to_string()];
    let key = DiagnosisKeyBuilder::new(vec![9u8; 16])
        .transmission_risk_level(3)
        .origin_country("FR")
        .submission_timestamp(29)
        .build()
        .unwrap();

    run(config, crypto(), vec![key], utc(2, 7, 0));

    assert_eq!(
        read_index(&country_dir(&output, "DE").join("date/index")),
        json!([])
    );
    assert!(!country_dir(&output, "DE").join("date/1970-01-02").exists());
    assert_eq!(
        read_index(&country_dir(&output, "FR").join("date/index")),
        json!(["1970-01-02"])
    );
    for country in ["FR", "EUR"] {
        let hour = hour_dir(&output, country, "1970-01-02", 5);
        assert_eq!(archive_names(&hour), vec!["index"]);
        assert_eq!(read_export(&hour.join("index")).keys.len(), 1);
    }
}

// =============================================================================
// Index files
// =============================================================================

/// Every `index` JSON array lists exactly the subdirectories next to it.
fn assert_index_complete(dir: &Path) {
    let Ok(bytes) = fs::read(dir.join("index")) else {
        return;
    };
    // Day aggregates are archives named `index`, not listings.
    if let Ok(Value::Array(listed)) = serde_json::from_slice::<Value>(&bytes) {
        let mut listed: Vec<String> = listed
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let mut present: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().unwrap().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        listed.sort();
        present.sort();
        assert_eq!(listed, present, "index of {}", dir.display());
        for name in present {
            assert_index_complete(&dir.join(name));
        }
    }
}

#[test]
fn test_indexes_list_every_subdirectory() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");

    let mut keys = de_keys(5, 29);
    keys.extend(de_keys(2, 53));
    run(config(&output), crypto(), keys, utc(3, 12, 0));

    assert_eq!(read_index(&output.join("version/index")), json!(["v1"]));
    assert_eq!(
        read_index(&output.join("version/v1/diagnosis-keys/country/index")),
        json!(["DE", "EUR"])
    );
    assert_eq!(
        read_index(&country_dir(&output, "DE").join("date/index")),
        json!(["1970-01-02", "1970-01-03"])
    );
    assert_index_complete(&output.join("version"));
    assert_index_complete(&country_dir(&output, "DE").join("date"));
    assert_index_complete(&country_dir(&output, "DE").join("date/1970-01-03/hour"));
}

#[test]
fn test_hours_listed_as_numbers() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");

    run(config(&output), crypto(), de_keys(3, 29), utc(2, 8, 0));

    let hours = read_index(&country_dir(&output, "DE").join("date/1970-01-02/hour/index"));
    assert_eq!(hours, json!([5, 6, 7]));
}

// =============================================================================
// Day aggregates
// =============================================================================

#[test]
fn test_day_aggregate_excludes_current_hour() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");
    let mut config = config(&output);
    config.bundling.include_incomplete_hours = true;

    let mut keys = de_keys(10, 29);
    keys.extend(de_keys(2, 30));
    run(config, crypto(), keys, utc(2, 6, 30));

    // The still accumulating hour is published on its own ...
    let current = read_export(&hour_dir(&output, "DE", "1970-01-02", 6).join("index"));
    assert_eq!(current.keys.len(), 2);

    // ... but not part of the day.
    let day = country_dir(&output, "DE").join("date/1970-01-02");
    let names = archive_names(&day);
    assert_eq!(names, vec!["index-1", "index-2", "index-3"]);
    let total: usize = names
        .iter()
        .map(|name| read_export(&day.join(name)).keys.len())
        .sum();
    assert_eq!(total, 10);

    let first = read_export(&day.join("index-1"));
    assert_eq!(first.start_timestamp, Some(86_400));
    assert_eq!(first.end_timestamp, Some(2 * 86_400));
}

#[test]
fn test_incomplete_day_not_aggregated_when_disabled() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");
    let mut config = config(&output);
    config.bundling.include_incomplete_days = false;

    run(config, crypto(), de_keys(3, 29), utc(2, 9, 0));

    let day = country_dir(&output, "DE").join("date/1970-01-02");
    assert!(day.join("hour/5/index").is_file());
    assert!(!day.join("index").exists());
}

// =============================================================================
// JSON key source
// =============================================================================

#[test]
fn test_assemble_from_json_key_file() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");
    let mut config = config(&output);
    config.api.supported_countries = vec!["DE".to_string(), "FR".to_string()];

    let source = JsonFileKeySource::load(diagnosis_keys_path()).unwrap();
    let mut assembly = exposure_dist::Assembly::new(
        config,
        crypto(),
        std::sync::Arc::new(exposure_dist::FixedClock(utc(2, 7, 0))),
    )
    .unwrap();
    let report = assembly.run(&source).unwrap();

    assert_eq!(report.keys_loaded, 11);
    assert_eq!(report.countries, vec!["DE", "FR", "EUR"]);
    assert_eq!(
        archive_names(&hour_dir(&output, "DE", "1970-01-02", 5)),
        vec!["index-1", "index-2", "index-3"]
    );

    // The foreign key visited DE, so it is published for DE only.
    let foreign = read_export(&hour_dir(&output, "DE", "1970-01-02", 6).join("index"));
    assert_eq!(foreign.keys.len(), 1);
    assert_eq!(foreign.keys[0].days_since_onset_of_symptoms, Some(-2));
    assert_eq!(foreign.keys[0].report_type, Some(ReportType::SelfReport as i32));
    assert_eq!(
        read_index(&country_dir(&output, "FR").join("date/index")),
        json!([])
    );
}
