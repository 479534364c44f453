//! Shared fixtures for distribution tests
//!
//! Builds configurations, signing material and diagnosis keys, runs
//! assemblies into temporary directories and reads back what they wrote.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use exposure_dist::crypto::{generate_private_key, PrivateKey};
use exposure_dist::structure::archive::unpack;
use exposure_dist::{
    Assembly, AssemblyReport, CryptoProvider, DistributionConfig, FixedClock, SignatureAlgorithm,
};
use exposure_keys::{DiagnosisKey, DiagnosisKeyBuilder, InMemoryKeySource};
use exposure_protocol::{decode_export, ExportHeader, TemporaryExposureKeyExport};

/// Path to the JSON key export fixture
pub fn diagnosis_keys_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keys/diagnosis_keys.json")
}

/// A fixed Ed25519 key, so repeated runs sign identically.
pub fn signing_key() -> PrivateKey {
    exposure_dist::crypto::decode_private_key(
        "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=",
        SignatureAlgorithm::Ed25519,
    )
    .unwrap()
}

pub fn crypto() -> Arc<CryptoProvider> {
    Arc::new(CryptoProvider::from_material(signing_key(), vec![0x30, 0x03, 0x02, 0x01, 0x00]))
}

pub fn random_crypto() -> Arc<CryptoProvider> {
    Arc::new(CryptoProvider::from_material(
        generate_private_key(SignatureAlgorithm::Ed25519),
        vec![0x30, 0x00],
    ))
}

/// Defaults with every hour published and at most four keys per file.
pub fn config(output: &Path) -> DistributionConfig {
    let mut config = DistributionConfig::default();
    config.paths.output = output.to_path_buf();
    config.bundling.shifting_policy_threshold = 1;
    config.tek_export.max_keys_per_file = 4;
    config
}

pub fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1970, 1, day, hour, minute, 0).unwrap()
}

/// `count` keys from DE, expired at 1970-01-02 00:00 and submitted at
/// `submission_hour` hours since the epoch.
pub fn de_keys(count: u8, submission_hour: u64) -> Vec<DiagnosisKey> {
    (0..count)
        .map(|i| {
            DiagnosisKeyBuilder::new(vec![i.wrapping_mul(37).wrapping_add(1); 16])
                .rolling_start_interval_number(0)
                .transmission_risk_level(1 + (i % 8) as i32)
                .origin_country("DE")
                .visited_countries(["DE"])
                .submission_timestamp(submission_hour)
                .build()
                .unwrap()
        })
        .collect()
}

pub fn run(
    config: DistributionConfig,
    crypto: Arc<CryptoProvider>,
    keys: Vec<DiagnosisKey>,
    now: DateTime<Utc>,
) -> AssemblyReport {
    let mut assembly = Assembly::new(config, crypto, Arc::new(FixedClock(now))).unwrap();
    assembly.run(&InMemoryKeySource::new(keys)).unwrap()
}

/// `.../diagnosis-keys/country/<country>` below `output`.
pub fn country_dir(output: &Path, country: &str) -> PathBuf {
    output
        .join("version/v1/diagnosis-keys/country")
        .join(country)
}

pub fn hour_dir(output: &Path, country: &str, date: &str, hour: u32) -> PathBuf {
    country_dir(output, country)
        .join("date")
        .join(date)
        .join("hour")
        .join(hour.to_string())
}

pub fn read_index(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

/// Names of the archives in `dir`, sorted, without sidecars.
pub fn archive_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.ends_with(".checksum"))
        .collect();
    names.sort();
    names
}

/// Entries of the archive at `path`.
pub fn archive_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    unpack(&fs::read(path).unwrap()).unwrap()
}

/// The decoded `export.bin` of the archive at `path`.
pub fn read_export(path: &Path) -> TemporaryExposureKeyExport {
    let entries = archive_entries(path);
    let (name, payload) = &entries[0];
    assert_eq!(name, "export.bin");
    decode_export(&ExportHeader::default(), payload).unwrap()
}
