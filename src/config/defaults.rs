//! Configuration structure and built-in defaults (layer 1)

use std::path::PathBuf;

use exposure_keys::{KeyNormalizer, ResetDaysSinceOnset, TransmissionRiskEncoding};
use exposure_protocol::{EXPORT_FILE_HEADER, EXPORT_FILE_HEADER_WIDTH};
use serde::{Deserialize, Serialize};

use crate::crypto::SignatureAlgorithm;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionConfig {
    pub paths: PathsConfig,
    pub api: ApiConfig,
    pub tek_export: TekExportConfig,
    pub signature: SignatureConfig,
    pub bundling: BundlingConfig,
    pub normalization: NormalizationConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Root directory the package tree is written to.
    pub output: PathBuf,
    pub private_key: PathBuf,
    pub certificate: PathBuf,
    /// Exposure configuration published as a signed file, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("out"),
            private_key: PathBuf::from("keys/private.pem"),
            certificate: PathBuf::from("keys/certificate.crt"),
            parameters: None,
        }
    }
}

/// Names of the directories and files of the published tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    pub version_path: String,
    pub version_v1: String,
    pub diagnosis_keys_path: String,
    pub parameters_path: String,
    pub country_path: String,
    pub date_path: String,
    pub hour_path: String,
    pub index_file_name: String,
    pub origin_country: String,
    /// Region carrying the union of all supported countries.
    pub eu_package_name: String,
    pub supported_countries: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            version_path: "version".to_string(),
            version_v1: "v1".to_string(),
            diagnosis_keys_path: "diagnosis-keys".to_string(),
            parameters_path: "parameters".to_string(),
            country_path: "country".to_string(),
            date_path: "date".to_string(),
            hour_path: "hour".to_string(),
            index_file_name: "index".to_string(),
            origin_country: "DE".to_string(),
            eu_package_name: "EUR".to_string(),
            supported_countries: vec!["DE".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TekExportConfig {
    pub file_name: String,
    pub file_header: String,
    pub file_header_width: usize,
    /// Name of the archive of a bucket; numbered when split.
    pub output_file_name: String,
    pub max_keys_per_file: usize,
}

impl Default for TekExportConfig {
    fn default() -> Self {
        Self {
            file_name: "export.bin".to_string(),
            file_header: EXPORT_FILE_HEADER.to_string(),
            file_header_width: EXPORT_FILE_HEADER_WIDTH,
            output_file_name: "index".to_string(),
            max_keys_per_file: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureConfig {
    pub algorithm: SignatureAlgorithm,
    pub verification_key_id: String,
    pub verification_key_version: String,
    pub file_name: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::EcdsaP256Sha256,
            verification_key_id: "262".to_string(),
            verification_key_version: "v1".to_string(),
            file_name: "export.sig".to_string(),
        }
    }
}

/// Rules deciding which keys go into which hour bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundlingConfig {
    /// How far back the key source is queried.
    pub retention_days: u32,
    /// Minutes a key must be expired before it is published.
    pub expiry_policy_minutes: u32,
    /// Minimum number of keys per published hour bucket.
    pub shifting_policy_threshold: usize,
    /// Buckets above this size are withheld.
    pub maximum_number_of_keys_per_bundle: usize,
    pub apply_policies_for_all_countries: bool,
    pub include_incomplete_days: bool,
    pub include_incomplete_hours: bool,
}

impl Default for BundlingConfig {
    fn default() -> Self {
        Self {
            retention_days: 14,
            expiry_policy_minutes: 120,
            shifting_policy_threshold: 140,
            maximum_number_of_keys_per_bundle: 600_000,
            apply_policies_for_all_countries: false,
            include_incomplete_days: true,
            include_incomplete_hours: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationMode {
    #[default]
    Encode,
    ResetDaysSinceOnset,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizationConfig {
    pub mode: NormalizationMode,
    pub transmission_risk_encoding: TransmissionRiskEncoding,
}

impl NormalizationConfig {
    /// The normalizer selected by `mode`.
    pub fn normalizer(&self) -> Box<dyn KeyNormalizer> {
        match self.mode {
            NormalizationMode::Encode => Box::new(self.transmission_risk_encoding.clone()),
            NormalizationMode::ResetDaysSinceOnset => Box::new(ResetDaysSinceOnset),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Threads writing independent branches of the tree.
    pub writer_threads: usize,
    /// Empty the output directory before writing.
    pub clear_output: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            writer_threads: 4,
            clear_output: true,
        }
    }
}
