//! Decorators over writables.
//!
//! Each decorator implements the traits of the node it wraps and forwards
//! whatever it does not intercept, so decorators nest in any order.

pub mod checksum;
pub mod indexing;
pub mod signing;

pub use checksum::{checksum_path, compute_checksum, ChecksumDecorator, CHECKSUM_FILE_SUFFIX};
pub use indexing::IndexingDecorator;
pub use signing::{ArchiveSigningDecorator, SignatureFile, SigningDecorator};
