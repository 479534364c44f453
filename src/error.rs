//! Errors raised while assembling the distribution tree.

use std::io;
use std::path::{Path, PathBuf};

use exposure_keys::{KeyValidationError, NormalizationError, SourceError};
use exposure_protocol::ProtocolError;
use thiserror::Error;

use crate::assembly::AssemblyState;
use crate::crypto::SigningError;

pub type AssemblyResult<T> = Result<T, AssemblyError>;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("archive {archive} must contain exactly one file to sign, found {found}")]
    UnexpectedFileCount { archive: String, found: usize },

    #[error("{operation} is not supported on {name}")]
    UnsupportedOperation {
        name: String,
        operation: &'static str,
    },

    #[error("archive {0} is sealed, its bytes have already been produced")]
    ArchiveSealed(String),

    #[error("directory {directory} already contains {name}")]
    DuplicateWritable { directory: String, name: String },

    #[error("failed to derive index of {directory}: {reason}")]
    Index { directory: String, reason: String },

    #[error("batch {batch_num}/{batch_size} of {region} is inconsistent: {reason}")]
    BatchMismatch {
        region: String,
        batch_num: i32,
        batch_size: i32,
        reason: String,
    },

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: AssemblyState,
        to: AssemblyState,
    },

    #[error("{failed} of {total} branches failed to write, first error: {first}")]
    BranchesFailed {
        failed: usize,
        total: usize,
        first: Box<AssemblyError>,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    InvalidKey(#[from] KeyValidationError),

    #[error("failed to load diagnosis keys: {0}")]
    Source(#[from] SourceError),

    #[error("failed to build write pool: {0}")]
    WritePool(#[from] rayon::ThreadPoolBuildError),
}

impl AssemblyError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        AssemblyError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Index derivation failure with a free-form reason.
    pub fn index(directory: impl Into<String>, reason: impl ToString) -> Self {
        AssemblyError::Index {
            directory: directory.into(),
            reason: reason.to_string(),
        }
    }
}
