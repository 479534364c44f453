//! Zip archive node.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use super::{Archive, Directory, DirectoryOnDisk, File, IndexStack, Writable};
use crate::error::{AssemblyError, AssemblyResult};

/// A file whose content is a zip of its staged child files.
///
/// Children are staged in memory. Only files are packed, in insertion
/// order, with fixed timestamps so identical content yields identical
/// bytes. Once the bytes have been produced the archive is sealed.
pub struct ArchiveOnDisk {
    staging: DirectoryOnDisk,
    sealed: AtomicBool,
}

impl ArchiveOnDisk {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            staging: DirectoryOnDisk::new(name),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> AssemblyResult<()> {
        if self.is_sealed() {
            return Err(AssemblyError::ArchiveSealed(self.name().to_string()));
        }
        Ok(())
    }
}

impl Writable for ArchiveOnDisk {
    fn name(&self) -> &str {
        self.staging.name()
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        self.staging.prepare(indices)
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        let bytes = self.bytes()?;
        fs::write(path, bytes).map_err(|e| AssemblyError::io(path, e))
    }

    fn as_file(&self) -> Option<&dyn File> {
        Some(self)
    }

    fn as_directory(&self) -> Option<&dyn Directory> {
        Some(self)
    }

    fn as_directory_mut(&mut self) -> Option<&mut dyn Directory> {
        Some(self)
    }
}

impl File for ArchiveOnDisk {
    fn bytes(&self) -> AssemblyResult<Vec<u8>> {
        self.sealed.store(true, Ordering::Release);
        pack(&self.staging.files())
    }

    fn set_bytes(&mut self, _bytes: Vec<u8>) -> AssemblyResult<()> {
        Err(AssemblyError::UnsupportedOperation {
            name: self.name().to_string(),
            operation: "setting archive bytes",
        })
    }

    /// The first staged file, so checksums follow the payload rather
    /// than the container framing.
    fn bytes_for_checksum(&self) -> AssemblyResult<Vec<u8>> {
        match self.staging.files().first() {
            Some(file) => file.bytes(),
            None => self.bytes(),
        }
    }
}

impl Directory for ArchiveOnDisk {
    fn add_writable(&mut self, writable: Box<dyn Writable>) -> AssemblyResult<()> {
        self.ensure_open()?;
        self.staging.add_writable(writable)
    }

    fn remove_writable(&mut self, name: &str) -> Option<Box<dyn Writable>> {
        if self.is_sealed() {
            return None;
        }
        self.staging.remove_writable(name)
    }

    fn writables(&self) -> &[Box<dyn Writable>] {
        self.staging.writables()
    }

    fn writable_mut(&mut self, name: &str) -> Option<&mut (dyn Writable + 'static)> {
        self.staging.writable_mut(name)
    }
}

impl Archive for ArchiveOnDisk {}

fn pack(files: &[&dyn File]) -> AssemblyResult<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for file in files {
        writer.start_file(file.name().to_string(), options)?;
        writer.write_all(&file.bytes()?).map_err(ZipError::Io)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Read every entry of a zip produced by [`ArchiveOnDisk`], in order.
pub fn unpack(bytes: &[u8]) -> AssemblyResult<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        // Declared sizes come from the archive itself and are not trusted.
        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(ZipError::Io)?;
        entries.push((entry.name().to_string(), content));
    }
    Ok(entries)
}
