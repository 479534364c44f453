//! Verification of a written distribution tree.
//!
//! Every `.checksum` sidecar must match its file, every archive must have a
//! sidecar, and every archive must hold an export with a valid header and
//! its signature list.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use exposure_protocol::{decode_export, ExportHeader};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DistributionConfig;
use crate::error::{AssemblyError, AssemblyResult};
use crate::structure::archive::unpack;
use crate::structure::decorator::{checksum_path, compute_checksum, CHECKSUM_FILE_SUFFIX};

/// Result of verifying an output directory
#[derive(Debug)]
pub struct VerificationResult {
    /// Whether verification passed
    pub passed: bool,

    /// Files that were checked
    pub checked: usize,

    /// Archives among the checked files
    pub archives: usize,

    /// Problems found (empty if passed)
    pub errors: Vec<VerificationError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// Archive without `.checksum` sidecar
    MissingChecksum { path: PathBuf },

    /// Sidecar without the file it belongs to
    OrphanChecksum { path: PathBuf },

    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    InvalidArchive { path: PathBuf, reason: String },
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::MissingChecksum { path } => {
                write!(f, "{}: missing checksum", path.display())
            }
            VerificationError::OrphanChecksum { path } => {
                write!(f, "{}: checksum without file", path.display())
            }
            VerificationError::ChecksumMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "{}: checksum mismatch ({} vs {})",
                path.display(),
                expected,
                actual
            ),
            VerificationError::InvalidArchive { path, reason } => {
                write!(f, "{}: {}", path.display(), reason)
            }
        }
    }
}

impl VerificationResult {
    /// Human-readable summary
    pub fn summary(&self) -> String {
        match self.errors.as_slice() {
            [] => format!(
                "verified {} files ({} archives)",
                self.checked, self.archives
            ),
            [only] => format!("verification failed: {}", only),
            [first, ..] => format!(
                "verification failed: {} errors (first: {})",
                self.errors.len(),
                first
            ),
        }
    }
}

/// Verify the tree written below `root`.
pub fn verify_output(root: &Path, config: &DistributionConfig) -> AssemblyResult<VerificationResult> {
    let export = &config.tek_export;
    let header = ExportHeader::new(export.file_header.clone(), export.file_header_width)?;
    let mut result = VerificationResult {
        passed: true,
        checked: 0,
        archives: 0,
        errors: Vec::new(),
    };

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            AssemblyError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        if let Some(companion) = companion_of(path) {
            if !companion.is_file() {
                result.errors.push(VerificationError::OrphanChecksum {
                    path: path.to_path_buf(),
                });
            }
            continue;
        }

        result.checked += 1;
        let bytes = fs::read(path).map_err(|e| AssemblyError::io(path, e))?;
        let is_archive = bytes.starts_with(b"PK");
        if is_archive {
            result.archives += 1;
        }
        let checksummed = if is_archive {
            match check_archive(&bytes, &header, config) {
                Ok(payload) => payload,
                Err(reason) => {
                    result.errors.push(VerificationError::InvalidArchive {
                        path: path.to_path_buf(),
                        reason,
                    });
                    continue;
                }
            }
        } else {
            bytes
        };

        let sidecar = checksum_path(path);
        match fs::read_to_string(&sidecar) {
            Ok(expected) => {
                let actual = compute_checksum(&checksummed);
                if expected.trim() != actual {
                    result.errors.push(VerificationError::ChecksumMismatch {
                        path: path.to_path_buf(),
                        expected: expected.trim().to_string(),
                        actual,
                    });
                }
            }
            Err(_) if is_archive => result.errors.push(VerificationError::MissingChecksum {
                path: path.to_path_buf(),
            }),
            Err(_) => {}
        }
    }

    result.passed = result.errors.is_empty();
    if result.passed {
        debug!(root = %root.display(), checked = result.checked, "output verified");
    } else {
        warn!(root = %root.display(), errors = result.errors.len(), "output verification failed");
    }
    Ok(result)
}

fn companion_of(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(CHECKSUM_FILE_SUFFIX)?;
    Some(path.with_file_name(stem))
}

/// The export payload of a valid archive.
fn check_archive(
    bytes: &[u8],
    header: &ExportHeader,
    config: &DistributionConfig,
) -> Result<Vec<u8>, String> {
    let entries = unpack(bytes).map_err(|e| e.to_string())?;
    let export_name = &config.tek_export.file_name;
    let signature_name = &config.signature.file_name;

    let (first, payload) = entries.first().ok_or("empty archive")?;
    if first != export_name {
        return Err(format!("first entry is {}, expected {}", first, export_name));
    }
    decode_export(header, payload).map_err(|e| e.to_string())?;
    if !entries.iter().any(|(name, _)| name == signature_name) {
        return Err(format!("no {}", signature_name));
    }
    Ok(payload.clone())
}
