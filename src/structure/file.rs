//! Plain file node.

use std::fs;
use std::path::Path;

use super::{File, IndexStack, Writable};
use crate::error::{AssemblyError, AssemblyResult};

/// A file whose bytes are held in memory until written.
#[derive(Debug, Clone)]
pub struct FileOnDisk {
    name: String,
    bytes: Vec<u8>,
}

impl FileOnDisk {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

impl Writable for FileOnDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _indices: &IndexStack) -> AssemblyResult<()> {
        Ok(())
    }

    /// Creates or truncates the target file.
    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        fs::write(path, &self.bytes).map_err(|e| AssemblyError::io(path, e))
    }

    fn as_file(&self) -> Option<&dyn File> {
        Some(self)
    }
}

impl File for FileOnDisk {
    fn bytes(&self) -> AssemblyResult<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn set_bytes(&mut self, bytes: Vec<u8>) -> AssemblyResult<()> {
        self.bytes = bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_file_in_parent() {
        let dir = TempDir::new().unwrap();
        let file = FileOnDisk::new("index", b"[\"DE\"]".to_vec());

        file.write(dir.path()).unwrap();

        assert_eq!(fs::read(dir.path().join("index")).unwrap(), b"[\"DE\"]");
    }

    #[test]
    fn test_write_truncates_existing_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index"), b"a much longer previous content").unwrap();

        FileOnDisk::new("index", b"new".to_vec())
            .write(dir.path())
            .unwrap();

        assert_eq!(fs::read(dir.path().join("index")).unwrap(), b"new");
    }

    #[test]
    fn test_write_into_missing_parent_fails_with_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let err = FileOnDisk::new("index", Vec::new())
            .write(&missing)
            .unwrap_err();
        match err {
            AssemblyError::Io { path, .. } => assert_eq!(path, missing.join("index")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
