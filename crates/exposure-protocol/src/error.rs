//! Error types for the export wire schema.

use thiserror::Error;

/// Errors raised while framing or parsing export files.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The header text does not fit into the configured width.
    #[error("export header {header:?} is longer than {width} bytes")]
    HeaderTooWide { header: String, width: usize },

    /// The file does not start with the expected header.
    #[error("export file does not start with header {expected:?}")]
    MissingHeader { expected: String },

    /// The protobuf body could not be decoded.
    #[error("failed to decode protobuf message: {0}")]
    Decode(#[from] prost::DecodeError),
}
