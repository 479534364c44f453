//! Diagnosis key sources.
//!
//! The assembly run pulls keys through [`DiagnosisKeySource`]; persistence
//! lives behind it. Two implementations ship with the crate: an in-memory
//! list and a JSON file export.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::key::{DiagnosisKey, KeyValidationError};

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("key #{index} in {path}: {source}")]
    InvalidKey {
        path: PathBuf,
        index: usize,
        #[source]
        source: KeyValidationError,
    },
}

pub trait DiagnosisKeySource: Send + Sync {
    /// Keys concerning `region` submitted in `[start, end)`.
    fn keys_for_bucket(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DiagnosisKey>, SourceError>;
}

/// Keys held in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeySource {
    keys: Vec<DiagnosisKey>,
}

impl InMemoryKeySource {
    pub fn new(keys: Vec<DiagnosisKey>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl DiagnosisKeySource for InMemoryKeySource {
    fn keys_for_bucket(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DiagnosisKey>, SourceError> {
        Ok(select(&self.keys, region, start, end))
    }
}

/// Keys loaded from a JSON array of serialized [`DiagnosisKey`]s.
#[derive(Debug, Clone)]
pub struct JsonFileKeySource {
    path: PathBuf,
    keys: Vec<DiagnosisKey>,
}

impl JsonFileKeySource {
    /// Load and validate every key in the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read(&path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let keys: Vec<DiagnosisKey> =
            serde_json::from_slice(&content).map_err(|source| SourceError::Parse {
                path: path.clone(),
                source,
            })?;
        for (index, key) in keys.iter().enumerate() {
            key.validate().map_err(|source| SourceError::InvalidKey {
                path: path.clone(),
                index,
                source,
            })?;
        }
        debug!(path = %path.display(), keys = keys.len(), "loaded diagnosis keys");
        Ok(Self { path, keys })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosisKeySource for JsonFileKeySource {
    fn keys_for_bucket(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DiagnosisKey>, SourceError> {
        Ok(select(&self.keys, region, start, end))
    }
}

fn select(
    keys: &[DiagnosisKey],
    region: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DiagnosisKey> {
    keys.iter()
        .filter(|key| key.concerns(region))
        .filter(|key| {
            let submitted = key.submission_timestamp() as i64 * SECONDS_PER_HOUR;
            submitted >= start.timestamp() && submitted < end.timestamp()
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DiagnosisKeyBuilder;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn key(byte: u8, origin: &str, hour: u64) -> DiagnosisKey {
        DiagnosisKeyBuilder::new(vec![byte; 16])
            .origin_country(origin)
            .transmission_risk_level(3)
            .submission_timestamp(hour)
            .build()
            .unwrap()
    }

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(h * 3600, 0).unwrap()
    }

    #[test]
    fn test_in_memory_filters_region_and_window() {
        let source = InMemoryKeySource::new(vec![
            key(1, "DE", 10),
            key(2, "DE", 11),
            key(3, "FR", 10),
            key(4, "DE", 12),
        ]);

        let keys = source.keys_for_bucket("DE", hour(10), hour(12)).unwrap();
        let bytes: Vec<u8> = keys.iter().map(|k| k.key_data()[0]).collect();
        assert_eq!(bytes, vec![1, 2]);
    }

    #[test]
    fn test_json_file_source_loads_and_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        let keys = vec![key(1, "DE", 10), key(2, "DE", 10)];
        fs::write(&path, serde_json::to_vec(&keys).unwrap()).unwrap();

        let source = JsonFileKeySource::load(&path).unwrap();
        assert_eq!(source.keys_for_bucket("DE", hour(0), hour(24)).unwrap(), keys);
    }

    #[test]
    fn test_json_file_source_rejects_invalid_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        let mut json = serde_json::to_value(vec![key(1, "DE", 10)]).unwrap();
        json[0]["transmission_risk_level"] = serde_json::json!(12);
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let err = JsonFileKeySource::load(&path).unwrap_err();
        assert!(matches!(err, SourceError::InvalidKey { index: 0, .. }));
    }

    #[test]
    fn test_json_file_source_missing_file() {
        let err = JsonFileKeySource::load("/nonexistent/keys.json").unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }
}
