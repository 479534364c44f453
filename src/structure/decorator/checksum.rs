//! `.checksum` sidecar files.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::trace;

use crate::error::{AssemblyError, AssemblyResult};
use crate::structure::{Directory, File, IndexStack, Writable};

pub const CHECKSUM_FILE_SUFFIX: &str = ".checksum";

/// Hex encoded MD5 of the MD5 digest of `bytes`.
pub fn compute_checksum(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(Md5::digest(bytes)))
}

/// Sidecar path of `path`.
pub fn checksum_path(path: &Path) -> PathBuf {
    let mut sidecar = OsString::from(path.as_os_str());
    sidecar.push(CHECKSUM_FILE_SUFFIX);
    PathBuf::from(sidecar)
}

/// Writes a checksum sidecar next to the wrapped file.
pub struct ChecksumDecorator<F> {
    inner: F,
}

impl<F: File> ChecksumDecorator<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: File> Writable for ChecksumDecorator<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        self.inner.prepare(indices)
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        self.inner.write_at(path)?;
        let checksum = compute_checksum(&self.inner.bytes_for_checksum()?);
        let sidecar = checksum_path(path);
        trace!(file = %sidecar.display(), %checksum, "writing checksum");
        fs::write(&sidecar, checksum).map_err(|e| AssemblyError::io(&sidecar, e))
    }

    fn as_file(&self) -> Option<&dyn File> {
        Some(self)
    }

    fn as_directory(&self) -> Option<&dyn Directory> {
        self.inner.as_directory()
    }

    fn as_directory_mut(&mut self) -> Option<&mut dyn Directory> {
        self.inner.as_directory_mut()
    }
}

impl<F: File> File for ChecksumDecorator<F> {
    fn bytes(&self) -> AssemblyResult<Vec<u8>> {
        self.inner.bytes()
    }

    fn set_bytes(&mut self, bytes: Vec<u8>) -> AssemblyResult<()> {
        self.inner.set_bytes(bytes)
    }

    fn bytes_for_checksum(&self) -> AssemblyResult<Vec<u8>> {
        self.inner.bytes_for_checksum()
    }
}
