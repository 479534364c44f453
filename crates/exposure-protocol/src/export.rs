//! Key export file (`export.bin`).
//!
//! An export file is a fixed-width text header followed by a serialized
//! [`TemporaryExposureKeyExport`]. Field tags follow the exposure
//! notification export format so published files can be consumed by
//! stock mobile frameworks.

use prost::Message;

use crate::error::ProtocolError;
use crate::{EXPORT_FILE_HEADER, EXPORT_FILE_HEADER_WIDTH};

/// Batch of temporary exposure keys for one region and time window.
#[derive(Clone, PartialEq, Message)]
pub struct TemporaryExposureKeyExport {
    /// Window start, seconds since the epoch (inclusive).
    #[prost(fixed64, optional, tag = "1")]
    pub start_timestamp: Option<u64>,
    /// Window end, seconds since the epoch (exclusive).
    #[prost(fixed64, optional, tag = "2")]
    pub end_timestamp: Option<u64>,
    #[prost(string, optional, tag = "3")]
    pub region: Option<String>,
    /// 1-based index of this file within its batch.
    #[prost(int32, optional, tag = "4")]
    pub batch_num: Option<i32>,
    /// Number of files in the batch.
    #[prost(int32, optional, tag = "5")]
    pub batch_size: Option<i32>,
    #[prost(message, repeated, tag = "6")]
    pub signature_infos: Vec<SignatureInfo>,
    #[prost(message, repeated, tag = "7")]
    pub keys: Vec<TemporaryExposureKey>,
    #[prost(message, repeated, tag = "8")]
    pub revised_keys: Vec<TemporaryExposureKey>,
}

/// Identifies the key a client must use to verify a signature.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct SignatureInfo {
    #[prost(string, optional, tag = "3")]
    pub verification_key_version: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub verification_key_id: Option<String>,
    /// ASN.1 OID of the signature algorithm.
    #[prost(string, optional, tag = "5")]
    pub signature_algorithm: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct TemporaryExposureKey {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub key_data: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "2")]
    pub transmission_risk_level: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub rolling_start_interval_number: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub rolling_period: Option<i32>,
    #[prost(enumeration = "ReportType", optional, tag = "5")]
    pub report_type: Option<i32>,
    #[prost(sint32, optional, tag = "6")]
    pub days_since_onset_of_symptoms: Option<i32>,
}

/// How the diagnosis behind a key was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ReportType {
    Unknown = 0,
    ConfirmedTest = 1,
    ConfirmedClinicalDiagnosis = 2,
    SelfReport = 3,
    Recursive = 4,
    Revoked = 5,
}

/// Fixed-width text header written in front of the export body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportHeader {
    text: String,
    width: usize,
}

impl Default for ExportHeader {
    fn default() -> Self {
        Self {
            text: EXPORT_FILE_HEADER.to_string(),
            width: EXPORT_FILE_HEADER_WIDTH,
        }
    }
}

impl ExportHeader {
    /// Create a header, rejecting text that does not fit into `width`.
    pub fn new(text: impl Into<String>, width: usize) -> Result<Self, ProtocolError> {
        let text = text.into();
        if text.len() > width {
            return Err(ProtocolError::HeaderTooWide { header: text, width });
        }
        Ok(Self { text, width })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Header text right-padded with spaces to the configured width.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{:<width$}", self.text, width = self.width).into_bytes()
    }
}

/// Serialize an export as header followed by the protobuf body.
pub fn encode_export(header: &ExportHeader, export: &TemporaryExposureKeyExport) -> Vec<u8> {
    let mut bytes = header.to_bytes();
    bytes.reserve(export.encoded_len());
    // Writing into a Vec can not run out of capacity.
    let _ = export.encode(&mut bytes);
    bytes
}

/// Parse an export file, validating its header.
pub fn decode_export(
    header: &ExportHeader,
    bytes: &[u8],
) -> Result<TemporaryExposureKeyExport, ProtocolError> {
    let expected = header.to_bytes();
    match bytes.strip_prefix(expected.as_slice()) {
        Some(body) => Ok(TemporaryExposureKeyExport::decode(body)?),
        None => Err(ProtocolError::MissingHeader {
            expected: header.text().to_string(),
        }),
    }
}
