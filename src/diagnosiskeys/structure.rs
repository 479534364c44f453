//! The `diagnosis-keys` subtree.
//!
//! ```text
//! diagnosis-keys/country/index                       ["DE", "EUR"]
//! diagnosis-keys/country/DE/date/index               ["1970-01-02"]
//! diagnosis-keys/country/DE/date/1970-01-02/index    day archive
//! diagnosis-keys/country/DE/date/1970-01-02/hour/index   [5]
//! diagnosis-keys/country/DE/date/1970-01-02/hour/5/index hour archive
//! ```

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use rayon::ThreadPool;
use serde_json::Value;

use super::aggregation::DateAggregatingDecorator;
use super::bundler::DiagnosisKeyBundler;
use super::export::{ExportAssembler, ExportBucket};
use crate::config::DistributionConfig;
use crate::error::{AssemblyError, AssemblyResult};
use crate::structure::decorator::IndexingDecorator;
use crate::structure::{Directory, DirectoryOnDisk, IndexDirectoryOnDisk, IndexStack, Writable};

/// Shared state of every index and writable function in the subtree.
#[derive(Clone)]
pub struct DiagnosisKeysStructure {
    config: Arc<DistributionConfig>,
    bundler: Arc<DiagnosisKeyBundler>,
    assembler: Arc<ExportAssembler>,
    write_pool: Option<Arc<ThreadPool>>,
}

impl DiagnosisKeysStructure {
    pub fn new(
        config: Arc<DistributionConfig>,
        bundler: Arc<DiagnosisKeyBundler>,
        assembler: Arc<ExportAssembler>,
    ) -> Self {
        Self {
            config,
            bundler,
            assembler,
            write_pool: None,
        }
    }

    /// Write country and date subdirectories concurrently on `pool`.
    pub fn with_write_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.write_pool = Some(pool);
        self
    }

    pub fn directory(&self) -> AssemblyResult<DirectoryOnDisk> {
        let mut root = DirectoryOnDisk::new(self.config.api.diagnosis_keys_path.clone());
        root.add_writable(Box::new(self.country_directory()))?;
        Ok(root)
    }

    fn country_directory(&self) -> impl Writable {
        let api = &self.config.api;
        let bundler = self.bundler.clone();
        let mut country = IndexDirectoryOnDisk::new(
            api.country_path.clone(),
            move |_: &IndexStack| Ok(bundler.countries()),
            |country: &String| country.clone(),
        );
        let structure = self.clone();
        country.add_writable_to_all(move |_: &IndexStack| {
            Ok(vec![Box::new(structure.date_directory()) as Box<dyn Writable>])
        });
        if let Some(pool) = &self.write_pool {
            country = country.with_write_pool(pool.clone());
        }
        IndexingDecorator::new(country, api.index_file_name.clone())
    }

    fn date_directory(&self) -> impl Writable {
        let api = &self.config.api;
        let bundler = self.bundler.clone();
        let date_path = api.date_path.clone();
        let mut date = IndexDirectoryOnDisk::new(
            api.date_path.clone(),
            move |indices: &IndexStack| Ok(bundler.dates(country(indices, &date_path)?)),
            |date: &NaiveDate| date.format("%Y-%m-%d").to_string(),
        );
        let structure = self.clone();
        date.add_writable_to_all(move |_: &IndexStack| {
            Ok(vec![Box::new(structure.hour_directory()) as Box<dyn Writable>])
        });
        if let Some(pool) = &self.write_pool {
            date = date.with_write_pool(pool.clone());
        }

        let indexed = IndexingDecorator::new(date, api.index_file_name.clone());
        DateAggregatingDecorator::new(
            indexed,
            self.assembler.clone(),
            api.hour_path.clone(),
            self.bundler.distribution_time(),
            self.config.bundling.include_incomplete_days,
        )
    }

    fn hour_directory(&self) -> impl Writable {
        let api = &self.config.api;
        let bundler = self.bundler.clone();
        let hour_path = api.hour_path.clone();
        let mut hour = IndexDirectoryOnDisk::new(
            api.hour_path.clone(),
            move |indices: &IndexStack| {
                let date = indices
                    .nearest_date()
                    .ok_or_else(|| AssemblyError::index(&hour_path, "no date on index stack"))?;
                Ok(bundler.hours(date, country(indices, &hour_path)?))
            },
            |hour: &NaiveDateTime| hour.hour().to_string(),
        );

        let bundler = self.bundler.clone();
        let assembler = self.assembler.clone();
        let hour_path = api.hour_path.clone();
        hour.add_writable_to_all(move |indices: &IndexStack| {
            let start = indices
                .nearest_hour()
                .ok_or_else(|| AssemblyError::index(&hour_path, "no hour on index stack"))?;
            let region = country(indices, &hour_path)?;
            let keys = assembler.export_keys(bundler.keys_for_hour(start, region), region)?;
            assembler.archives(&ExportBucket::hour(region, start), keys)
        });

        IndexingDecorator::new(hour, api.index_file_name.clone())
            .with_index_formatter(|hour: &NaiveDateTime| Value::from(hour.hour()))
    }
}

fn country<'a>(indices: &'a IndexStack, directory: &str) -> AssemblyResult<&'a str> {
    indices
        .nearest_text()
        .ok_or_else(|| AssemblyError::index(directory, "no country on index stack"))
}
