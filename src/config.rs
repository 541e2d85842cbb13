use crate::common::constants::{DEFAULT_DOCUMENT_TIMEOUT_SECS, MIN_DOCUMENT_BYTES};
use crate::common::error::{NormalizerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Optional on-disk defaults, read from a TOML file with a `[run]` table.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunSection {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub document_timeout_secs: Option<u64>,
    pub min_document_bytes: Option<u64>,
    pub force: Option<bool>,
    pub fail_fast: Option<bool>,
}

impl FileConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            NormalizerError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let config: FileConfig = toml::from_str(&config_content)?;
        Ok(config)
    }
}

/// Immutable run-wide settings handed to every stage.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Replace existing output instead of refusing to run
    pub force: bool,
    /// Abort on the first per-document failure
    pub fail_fast: bool,
    pub verbose: bool,
    /// Maximum documents processed at once
    pub concurrency: usize,
    #[serde(with = "duration_secs")]
    pub document_timeout: Duration,
    pub min_document_bytes: u64,
}

impl RunConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            force: false,
            fail_fast: false,
            verbose: false,
            concurrency: default_concurrency(),
            document_timeout: Duration::from_secs(DEFAULT_DOCUMENT_TIMEOUT_SECS),
            min_document_bytes: MIN_DOCUMENT_BYTES,
        }
    }

    /// Fill unset values from a file config. Values already set on the
    /// command line are passed in as `Some` and win.
    pub fn from_sources(file: FileConfig, cli: RunOverrides) -> Result<Self> {
        let run = file.run;
        let input_dir = cli
            .input_dir
            .or(run.input_dir)
            .ok_or_else(|| NormalizerError::Config("input directory is required".to_string()))?;
        let output_dir = cli
            .output_dir
            .or(run.output_dir)
            .ok_or_else(|| NormalizerError::Config("output directory is required".to_string()))?;

        let mut config = RunConfig::new(input_dir, output_dir);
        config.force = cli.force || run.force.unwrap_or(false);
        config.fail_fast = cli.fail_fast || run.fail_fast.unwrap_or(false);
        config.verbose = cli.verbose;
        if let Some(c) = cli.concurrency.or(run.concurrency) {
            config.concurrency = c;
        }
        if let Some(secs) = cli.document_timeout_secs.or(run.document_timeout_secs) {
            config.document_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = run.min_document_bytes {
            config.min_document_bytes = bytes;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(NormalizerError::Config("concurrency must be at least 1".to_string()));
        }
        if self.document_timeout.is_zero() {
            return Err(NormalizerError::Config("document timeout must be positive".to_string()));
        }
        if !self.input_dir.is_dir() {
            return Err(NormalizerError::Config(format!(
                "input directory does not exist: {}",
                self.input_dir.display()
            )));
        }
        Ok(())
    }
}

/// Values supplied on the command line
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub force: bool,
    pub fail_fast: bool,
    pub verbose: bool,
    pub concurrency: Option<usize>,
    pub document_timeout_secs: Option<u64>,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
