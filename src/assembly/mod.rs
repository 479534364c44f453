//! Assembly runs
//!
//! One run loads the keys of the retention window, prepares the complete
//! distribution tree in memory and then writes it to the output
//! directory. Nothing touches the output before preparing has succeeded.

pub mod clock;
pub mod state;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, DurationRound, NaiveDateTime, Utc};
use exposure_keys::{DiagnosisKey, DiagnosisKeySource};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{debug, error, info};
use ulid::Ulid;
use walkdir::WalkDir;

use crate::config::DistributionConfig;
use crate::crypto::CryptoProvider;
use crate::diagnosiskeys::{DiagnosisKeyBundler, DiagnosisKeysStructure, ExportAssembler};
use crate::error::{AssemblyError, AssemblyResult};
use crate::parameters::parameters_directory;
use crate::structure::decorator::IndexingDecorator;
use crate::structure::{Directory, DirectoryOnDisk, IndexDirectoryOnDisk, IndexStack, Writable};

pub use clock::{Clock, FixedClock, SystemClock};
pub use state::AssemblyState;

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub run_id: String,
    pub state: AssemblyState,
    pub distribution_time: NaiveDateTime,
    pub keys_loaded: usize,
    pub countries: Vec<String>,
    pub prepare_ms: u64,
    pub write_ms: u64,
    pub files_written: usize,
}

struct Prepared {
    root: DirectoryOnDisk,
    distribution_time: NaiveDateTime,
    keys_loaded: usize,
    countries: Vec<String>,
}

pub struct Assembly {
    config: Arc<DistributionConfig>,
    crypto: Arc<CryptoProvider>,
    clock: Arc<dyn Clock>,
    write_pool: Arc<ThreadPool>,
    run_id: Ulid,
    state: AssemblyState,
}

impl Assembly {
    pub fn new(
        config: DistributionConfig,
        crypto: Arc<CryptoProvider>,
        clock: Arc<dyn Clock>,
    ) -> AssemblyResult<Self> {
        let write_pool = ThreadPoolBuilder::new()
            .num_threads(config.runtime.writer_threads.max(1))
            .thread_name(|i| format!("writer-{}", i))
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            crypto,
            clock,
            write_pool: Arc::new(write_pool),
            run_id: Ulid::new(),
            state: AssemblyState::Idle,
        })
    }

    pub fn run_id(&self) -> Ulid {
        self.run_id
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Current time truncated to the start of the hour.
    pub fn distribution_time(&self) -> NaiveDateTime {
        let now = self.clock.now().naive_utc();
        now.duration_trunc(Duration::hours(1)).unwrap_or(now)
    }

    /// Prepare and write the distribution tree.
    pub fn run(&mut self, source: &dyn DiagnosisKeySource) -> AssemblyResult<AssemblyReport> {
        self.advance(AssemblyState::Preparing)?;
        info!(run_id = %self.run_id, "preparing distribution");
        let started = Instant::now();
        let prepared = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail(e)),
        };
        let prepare_ms = started.elapsed().as_millis() as u64;

        self.advance(AssemblyState::Writing)?;
        let output = self.config.paths.output.clone();
        info!(run_id = %self.run_id, output = %output.display(), "writing distribution");
        let started = Instant::now();
        if let Err(e) = self.write(&prepared.root, &output) {
            return Err(self.fail(e));
        }
        let write_ms = started.elapsed().as_millis() as u64;
        self.advance(AssemblyState::Done)?;

        let report = AssemblyReport {
            run_id: self.run_id.to_string(),
            state: self.state,
            distribution_time: prepared.distribution_time,
            keys_loaded: prepared.keys_loaded,
            countries: prepared.countries,
            prepare_ms,
            write_ms,
            files_written: count_files(&output),
        };
        info!(
            run_id = %report.run_id,
            files = report.files_written,
            prepare_ms,
            write_ms,
            "distribution done"
        );
        Ok(report)
    }

    fn advance(&mut self, target: AssemblyState) -> AssemblyResult<()> {
        self.state = self.state.transition(target)?;
        debug!(run_id = %self.run_id, state = ?self.state, "assembly state");
        Ok(())
    }

    fn fail(&mut self, e: AssemblyError) -> AssemblyError {
        error!(run_id = %self.run_id, state = ?self.state, error = %e, "assembly failed");
        match self.advance(AssemblyState::Failed) {
            Ok(()) => e,
            Err(transition) => transition,
        }
    }

    fn prepare(&self, source: &dyn DiagnosisKeySource) -> AssemblyResult<Prepared> {
        let distribution_time = self.distribution_time();
        let keys = self.load_keys(source, distribution_time)?;
        let keys_loaded = keys.len();

        let bundler = Arc::new(DiagnosisKeyBundler::new(
            &self.config.bundling,
            &self.config.api,
            keys,
            distribution_time,
        ));
        let countries = bundler.countries();
        let normalizer = Arc::from(self.config.normalization.normalizer());
        let assembler = Arc::new(ExportAssembler::new(
            &self.config,
            normalizer,
            self.crypto.clone(),
        )?);
        let diagnosis_keys = DiagnosisKeysStructure::new(self.config.clone(), bundler, assembler)
            .with_write_pool(self.write_pool.clone());

        let parameters = match &self.config.paths.parameters {
            Some(path) => Some(Arc::new(fs::read(path).map_err(|e| AssemblyError::io(path, e))?)),
            None => None,
        };

        let mut root = DirectoryOnDisk::new(
            self.config
                .paths
                .output
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        root.add_writable(Box::new(self.version_directory(diagnosis_keys, parameters)))?;
        root.prepare(&IndexStack::new())?;

        Ok(Prepared {
            root,
            distribution_time,
            keys_loaded,
            countries,
        })
    }

    fn version_directory(
        &self,
        diagnosis_keys: DiagnosisKeysStructure,
        parameters: Option<Arc<Vec<u8>>>,
    ) -> impl Writable {
        let api = &self.config.api;
        let version = api.version_v1.clone();
        let mut directory = IndexDirectoryOnDisk::new(
            api.version_path.clone(),
            move |_: &IndexStack| Ok(vec![version.clone()]),
            |version: &String| version.clone(),
        );

        let config = self.config.clone();
        let crypto = self.crypto.clone();
        directory.add_writable_to_all(move |_: &IndexStack| {
            let mut writables: Vec<Box<dyn Writable>> = vec![Box::new(diagnosis_keys.directory()?)];
            if let Some(payload) = &parameters {
                writables.push(Box::new(parameters_directory(
                    &config,
                    crypto.clone(),
                    payload.as_ref().clone(),
                )));
            }
            Ok(writables)
        });

        IndexingDecorator::new(directory, api.index_file_name.clone())
    }

    /// Keys of every supported country over the retention window, without
    /// duplicates.
    fn load_keys(
        &self,
        source: &dyn DiagnosisKeySource,
        distribution_time: NaiveDateTime,
    ) -> AssemblyResult<Vec<DiagnosisKey>> {
        let end: DateTime<Utc> = (distribution_time + Duration::hours(1)).and_utc();
        let start = end - Duration::days(self.config.bundling.retention_days as i64);

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for country in &self.config.api.supported_countries {
            for key in source.keys_for_bucket(country, start, end)? {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        info!(keys = keys.len(), %start, %end, "loaded diagnosis keys");
        Ok(keys)
    }

    fn write(&self, root: &DirectoryOnDisk, output: &Path) -> AssemblyResult<()> {
        if self.config.runtime.clear_output && output.exists() {
            debug!(output = %output.display(), "clearing output directory");
            fs::remove_dir_all(output).map_err(|e| AssemblyError::io(output, e))?;
        }
        root.write_at(output)
    }
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}
