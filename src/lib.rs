//! Exposure Notification Distribution
//!
//! This crate assembles the static file tree published by the distribution
//! service of an exposure notification backend: diagnosis keys bundled per
//! country, day and hour into signed export archives, with index files and
//! checksums that let clients discover and validate them.

pub mod assembly;
pub mod config;
pub mod crypto;
pub mod diagnosiskeys;
pub mod error;
pub mod parameters;
pub mod structure;
pub mod verify;

pub use assembly::{Assembly, AssemblyReport, AssemblyState, Clock, FixedClock, SystemClock};
pub use config::{DistributionConfig, LoadedConfig};
pub use crypto::{CryptoProvider, SignatureAlgorithm, SigningError};
pub use error::{AssemblyError, AssemblyResult};
pub use verify::{verify_output, VerificationError, VerificationResult};
