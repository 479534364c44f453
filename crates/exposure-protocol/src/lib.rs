//! Exposure Notification Export Wire Schema
//!
//! Protobuf messages and framing for the files published by the
//! distribution service: the `export.bin` key export, the `export.sig`
//! signature list, and the signed payload envelope used for single files.

pub mod error;
pub mod export;
pub mod signature;

pub use error::ProtocolError;
pub use export::{
    decode_export, encode_export, ExportHeader, ReportType, SignatureInfo, TemporaryExposureKey,
    TemporaryExposureKeyExport,
};
pub use signature::{SignedPayload, TekSignature, TekSignatureList};

/// Header text that prefixes every key export file.
pub const EXPORT_FILE_HEADER: &str = "EK Export v1";

/// Width the header text is right-padded to with spaces.
pub const EXPORT_FILE_HEADER_WIDTH: usize = 16;
