//! Distribution configuration
//!
//! The effective configuration is merged from three layers:
//! 1. Built-in defaults ([`DistributionConfig::default`])
//! 2. An optional TOML file
//! 3. `--set key.path=value` overrides from the command line
//!
//! Layers are merged as JSON values, then deserialized and validated.

mod defaults;
mod loader;
mod merge;

pub use defaults::{
    ApiConfig, BundlingConfig, DistributionConfig, NormalizationConfig, NormalizationMode,
    PathsConfig, RuntimeConfig, SignatureConfig, TekExportConfig,
};
pub use loader::{ConfigError, ConfigOrigin, ConfigSource, LoadedConfig};
pub use merge::{overlay, parse_override};
