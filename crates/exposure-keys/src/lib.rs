//! Diagnosis Keys
//!
//! The diagnosis key entity consumed by the distribution service, the
//! normalization rules applied before keys are exported, and the source
//! interface the assembly run queries for keys.

pub mod key;
pub mod normalize;
pub mod source;

pub use key::{DiagnosisKey, DiagnosisKeyBuilder, KeyValidationError, ReportType};
pub use normalize::{
    KeyNormalizer, NormalizationError, NormalizedFields, ResetDaysSinceOnset,
    TransmissionRiskEncoding,
};
pub use source::{DiagnosisKeySource, InMemoryKeySource, JsonFileKeySource, SourceError};

/// Number of bytes in a temporary exposure key.
pub const KEY_DATA_LENGTH: usize = 16;

/// Longest validity of a key, in 10 minute intervals.
pub const MAX_ROLLING_PERIOD: u32 = 144;

pub const MIN_TRANSMISSION_RISK_LEVEL: i32 = 1;
pub const MAX_TRANSMISSION_RISK_LEVEL: i32 = 8;

pub const MIN_DAYS_SINCE_ONSET_OF_SYMPTOMS: i32 = -14;
pub const MAX_DAYS_SINCE_ONSET_OF_SYMPTOMS: i32 = 4000;
