//! Writable tree
//!
//! The published output is modelled as a tree of writables: files,
//! directories, archives (files whose content is a zip of staged files)
//! and index directories (directories whose children are derived from an
//! index function). Every node goes through two phases:
//!
//! 1. `prepare` walks the tree top-down, threading an immutable
//!    [`IndexStack`], and computes all content in memory.
//! 2. `write` walks the tree top-down and persists it. Nodes hold no
//!    parent pointer; the target path is passed down instead.
//!
//! Decorators wrap a node, implement the same traits, and intercept some
//! of its operations.

pub mod archive;
pub mod decorator;
pub mod directory;
pub mod file;
pub mod index;
pub mod stack;

use std::path::Path;

use crate::error::AssemblyResult;

pub use archive::ArchiveOnDisk;
pub use directory::DirectoryOnDisk;
pub use file::FileOnDisk;
pub use index::{IndexDirectoryOnDisk, IndexFunction, IndexFormatter, WritableFunction};
pub use stack::{Index, IndexStack};

/// A node of the output tree.
pub trait Writable: Send + Sync {
    /// Name within the parent directory.
    fn name(&self) -> &str;

    /// Compute in-memory content. Must not touch the disk.
    fn prepare(&mut self, indices: &IndexStack) -> AssemblyResult<()>;

    /// Persist this node at exactly `path`.
    fn write_at(&self, path: &Path) -> AssemblyResult<()>;

    /// Persist this node inside `parent`.
    fn write(&self, parent: &Path) -> AssemblyResult<()> {
        self.write_at(&parent.join(self.name()))
    }

    fn as_file(&self) -> Option<&dyn File> {
        None
    }

    fn as_directory(&self) -> Option<&dyn Directory> {
        None
    }

    fn as_directory_mut(&mut self) -> Option<&mut dyn Directory> {
        None
    }

    fn is_file(&self) -> bool {
        self.as_file().is_some()
    }

    fn is_directory(&self) -> bool {
        self.as_directory().is_some()
    }

    fn is_archive(&self) -> bool {
        self.is_file() && self.is_directory()
    }
}

/// A writable holding bytes.
pub trait File: Writable {
    fn bytes(&self) -> AssemblyResult<Vec<u8>>;

    fn set_bytes(&mut self, bytes: Vec<u8>) -> AssemblyResult<()>;

    /// Bytes the checksum sidecar is computed over.
    fn bytes_for_checksum(&self) -> AssemblyResult<Vec<u8>> {
        self.bytes()
    }
}

/// A writable owning an ordered set of uniquely named children.
pub trait Directory: Writable {
    fn add_writable(&mut self, writable: Box<dyn Writable>) -> AssemblyResult<()>;

    fn remove_writable(&mut self, name: &str) -> Option<Box<dyn Writable>>;

    fn writables(&self) -> &[Box<dyn Writable>];

    fn writable(&self, name: &str) -> Option<&dyn Writable> {
        self.writables()
            .iter()
            .find(|writable| writable.name() == name)
            .map(|writable| writable.as_ref())
    }

    fn writable_mut(&mut self, name: &str) -> Option<&mut (dyn Writable + 'static)>;

    /// Children that are files, in insertion order.
    fn files(&self) -> Vec<&dyn File> {
        self.writables()
            .iter()
            .filter_map(|writable| writable.as_file())
            .collect()
    }
}

/// A file whose content is a container of its staged children.
pub trait Archive: File + Directory {}

/// A directory with one subdirectory per derived index value.
pub trait IndexDirectory<T>: Directory {
    /// Derive the index values for the given stack.
    fn index(&self, indices: &IndexStack) -> AssemblyResult<Vec<T>>;

    /// Name of the subdirectory created for `value`.
    fn format(&self, value: &T) -> String;
}
