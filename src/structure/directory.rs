//! Plain directory node.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::warn;

use super::{Directory, IndexStack, Writable};
use crate::error::{AssemblyError, AssemblyResult};

/// A directory whose children are written in insertion order.
///
/// With a write pool attached, the children are written concurrently on
/// that pool instead. A failing child does not stop its siblings; all
/// failures are collected into [`AssemblyError::BranchesFailed`].
pub struct DirectoryOnDisk {
    name: String,
    writables: Vec<Box<dyn Writable>>,
    write_pool: Option<Arc<ThreadPool>>,
}

impl DirectoryOnDisk {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writables: Vec::new(),
            write_pool: None,
        }
    }

    /// Write children concurrently on `pool`.
    pub fn with_write_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.write_pool = Some(pool);
        self
    }

    pub fn set_write_pool(&mut self, pool: Option<Arc<ThreadPool>>) {
        self.write_pool = pool;
    }

    fn write_children(&self, path: &Path) -> AssemblyResult<()> {
        let Some(pool) = &self.write_pool else {
            for writable in &self.writables {
                writable.write(path)?;
            }
            return Ok(());
        };

        let results: Vec<AssemblyResult<()>> = pool.install(|| {
            self.writables
                .par_iter()
                .map(|writable| writable.write(path))
                .collect()
        });

        let total = results.len();
        let mut errors: Vec<AssemblyError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            return Ok(());
        }
        for error in errors.iter().skip(1) {
            warn!(directory = %path.display(), error = %error, "branch failed to write");
        }
        let failed = errors.len();
        let first = errors.swap_remove(0);
        Err(AssemblyError::BranchesFailed {
            failed,
            total,
            first: Box::new(first),
        })
    }
}

impl Writable for DirectoryOnDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()> {
        for writable in &mut self.writables {
            writable.prepare(indices)?;
        }
        Ok(())
    }

    fn write_at(&self, path: &Path) -> AssemblyResult<()> {
        fs::create_dir_all(path).map_err(|e| AssemblyError::io(path, e))?;
        self.write_children(path)
    }

    fn as_directory(&self) -> Option<&dyn Directory> {
        Some(self)
    }

    fn as_directory_mut(&mut self) -> Option<&mut dyn Directory> {
        Some(self)
    }
}

impl Directory for DirectoryOnDisk {
    fn add_writable(&mut self, writable: Box<dyn Writable>) -> AssemblyResult<()> {
        if self.writable(writable.name()).is_some() {
            return Err(AssemblyError::DuplicateWritable {
                directory: self.name.clone(),
                name: writable.name().to_string(),
            });
        }
        self.writables.push(writable);
        Ok(())
    }

    fn remove_writable(&mut self, name: &str) -> Option<Box<dyn Writable>> {
        let position = self.writables.iter().position(|w| w.name() == name)?;
        Some(self.writables.remove(position))
    }

    fn writables(&self) -> &[Box<dyn Writable>] {
        &self.writables
    }

    fn writable_mut(&mut self, name: &str) -> Option<&mut (dyn Writable + 'static)> {
        self.writables
            .iter_mut()
            .find(|writable| writable.name() == name)
            .map(|writable| writable.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::FileOnDisk;
    use tempfile::TempDir;

    fn file(name: &str) -> Box<dyn Writable> {
        Box::new(FileOnDisk::new(name, name.as_bytes().to_vec()))
    }

    #[test]
    fn test_write_creates_nested_tree() {
        let dir = TempDir::new().unwrap();
        let mut inner = DirectoryOnDisk::new("inner");
        inner.add_writable(file("b")).unwrap();
        let mut root = DirectoryOnDisk::new("root");
        root.add_writable(file("a")).unwrap();
        root.add_writable(Box::new(inner)).unwrap();

        root.write(dir.path()).unwrap();

        assert_eq!(fs::read(dir.path().join("root/a")).unwrap(), b"a");
        assert_eq!(fs::read(dir.path().join("root/inner/b")).unwrap(), b"b");
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut root = DirectoryOnDisk::new("root");
        root.add_writable(file("a")).unwrap();

        root.write(dir.path()).unwrap();
        root.write(dir.path()).unwrap();

        assert_eq!(fs::read(dir.path().join("root/a")).unwrap(), b"a");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut root = DirectoryOnDisk::new("root");
        root.add_writable(file("a")).unwrap();
        let err = root.add_writable(file("a")).unwrap_err();
        assert!(matches!(err, AssemblyError::DuplicateWritable { .. }));
    }

    #[test]
    fn test_remove_and_lookup() {
        let mut root = DirectoryOnDisk::new("root");
        root.add_writable(file("a")).unwrap();
        root.add_writable(file("b")).unwrap();

        assert!(root.writable("b").is_some());
        assert!(root.remove_writable("a").is_some());
        assert!(root.remove_writable("a").is_none());
        assert_eq!(root.writables().len(), 1);
    }

    #[test]
    fn test_pool_write_reports_all_failures_and_keeps_siblings() {
        let dir = TempDir::new().unwrap();
        // A plain file where a child directory should go makes that branch fail.
        fs::create_dir_all(dir.path().join("root")).unwrap();
        fs::write(dir.path().join("root/blocked"), b"x").unwrap();

        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        let mut blocked = DirectoryOnDisk::new("blocked");
        blocked.add_writable(file("inner")).unwrap();
        let mut root = DirectoryOnDisk::new("root").with_write_pool(pool);
        root.add_writable(Box::new(blocked)).unwrap();
        root.add_writable(file("ok")).unwrap();

        let err = root.write(dir.path()).unwrap_err();

        match err {
            AssemblyError::BranchesFailed { failed, total, .. } => {
                assert_eq!((failed, total), (1, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fs::read(dir.path().join("root/ok")).unwrap(), b"ok");
    }
}
