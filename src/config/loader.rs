//! Loading and validating the effective configuration.

use std::fs;
use std::path::Path;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::defaults::DistributionConfig;
use super::merge::overlay;

const COUNTRY_PATTERN: &str = r"^[A-Z]{2,3}$";
const NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";

/// Origin of a configuration layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Validated configuration and the layers it was built from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DistributionConfig,
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Merge defaults, the optional file and CLI overrides, then validate.
    pub fn load(file: Option<&Path>, overrides: Vec<Value>) -> Result<Self, ConfigError> {
        let mut merged = serde_json::to_value(DistributionConfig::default())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = file {
            let (value, digest) = load_toml_file(path)?;
            overlay(&mut merged, value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if !overrides.is_empty() {
            for value in overrides {
                overlay(&mut merged, value);
            }
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let config: DistributionConfig = serde_json::from_value(merged)
            .map_err(|e| ConfigError::ParseError(format!("invalid configuration: {}", e)))?;
        validate(&config)?;
        debug!(layers = sources.len(), "configuration loaded");

        Ok(Self { config, sources })
    }
}

/// Read a TOML file, returning it as JSON together with its digest.
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;
    let value: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

    Ok((toml_to_json(value), digest))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

fn validate(config: &DistributionConfig) -> Result<(), ConfigError> {
    let country = Regex::new(COUNTRY_PATTERN).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    let name = Regex::new(NAME_PATTERN).map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    let api = &config.api;
    let countries = std::iter::once(&api.origin_country)
        .chain(std::iter::once(&api.eu_package_name))
        .chain(api.supported_countries.iter());
    for code in countries {
        if !country.is_match(code) {
            return Err(ConfigError::ValidationError(format!(
                "{:?} is not a country code",
                code
            )));
        }
    }
    if !api.supported_countries.contains(&api.origin_country) {
        return Err(ConfigError::ValidationError(format!(
            "origin country {} must be one of the supported countries",
            api.origin_country
        )));
    }
    if api.supported_countries.contains(&api.eu_package_name) {
        return Err(ConfigError::ValidationError(format!(
            "EU package name {} clashes with a supported country",
            api.eu_package_name
        )));
    }

    let names = [
        ("api.version_path", &api.version_path),
        ("api.version_v1", &api.version_v1),
        ("api.diagnosis_keys_path", &api.diagnosis_keys_path),
        ("api.parameters_path", &api.parameters_path),
        ("api.country_path", &api.country_path),
        ("api.date_path", &api.date_path),
        ("api.hour_path", &api.hour_path),
        ("api.index_file_name", &api.index_file_name),
        ("tek_export.file_name", &config.tek_export.file_name),
        ("tek_export.output_file_name", &config.tek_export.output_file_name),
        ("signature.file_name", &config.signature.file_name),
        ("signature.verification_key_id", &config.signature.verification_key_id),
        (
            "signature.verification_key_version",
            &config.signature.verification_key_version,
        ),
    ];
    for (field, value) in names {
        if !name.is_match(value) {
            return Err(ConfigError::ValidationError(format!(
                "{} = {:?} is not a valid name",
                field, value
            )));
        }
    }
    if config.tek_export.file_name == config.signature.file_name {
        return Err(ConfigError::ValidationError(
            "export and signature file names must differ".to_string(),
        ));
    }

    let export = &config.tek_export;
    if export.file_header.len() > export.file_header_width {
        return Err(ConfigError::ValidationError(format!(
            "file header {:?} does not fit into {} bytes",
            export.file_header, export.file_header_width
        )));
    }
    if export.max_keys_per_file == 0 {
        return Err(ConfigError::ValidationError(
            "tek_export.max_keys_per_file must be at least 1".to_string(),
        ));
    }
    if config.bundling.maximum_number_of_keys_per_bundle == 0 {
        return Err(ConfigError::ValidationError(
            "bundling.maximum_number_of_keys_per_bundle must be at least 1".to_string(),
        ));
    }
    if config.runtime.writer_threads == 0 {
        return Err(ConfigError::ValidationError(
            "runtime.writer_threads must be at least 1".to_string(),
        ));
    }

    config
        .normalization
        .transmission_risk_encoding
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
