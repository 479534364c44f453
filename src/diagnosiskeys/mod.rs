//! Diagnosis key distribution
//!
//! Bundling of keys into hour buckets, assembly of signed export archives,
//! day aggregation and the directory structure they are published in.

pub mod aggregation;
pub mod bundler;
pub mod export;
pub mod structure;

pub use aggregation::DateAggregatingDecorator;
pub use bundler::DiagnosisKeyBundler;
pub use export::{
    order_keys, ExportAssembler, ExportBucket, TekSignatureFile, TemporaryExposureKeyExportFile,
};
pub use structure::DiagnosisKeysStructure;
