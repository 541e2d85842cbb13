// Pipeline storage: staged table output, manifest and commit

pub mod manifest;
pub mod tables;

use crate::common::constants::{
    CONCEPT_TABLE_FILE, ENTITY_TABLE_FILE, FACT_TABLE_FILE, FILING_TABLE_FILE, OUTPUT_FILES,
    RAG_DIR, SEC_DIR, SENTENCE_TABLE_FILE,
};
use crate::common::error::{NormalizerError, Result};
use crate::common::types::{ConceptRow, EntityRow, FilingRow, RankedFact, SentenceRow};
use crate::observability::metrics;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use manifest::{DocumentOutcome, Manifest, ManifestRecorder, TableCounts};

/// Everything the run produces besides the manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTables {
    pub entities: Vec<EntityRow>,
    pub concepts: Vec<ConceptRow>,
    pub facts: Vec<RankedFact>,
    pub filings: Vec<FilingRow>,
    pub sentences: Vec<SentenceRow>,
}

impl NormalizedTables {
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            entities: self.entities.len(),
            concepts: self.concepts.len(),
            facts: self.facts.len(),
            preferred_facts: self.facts.iter().filter(|f| f.is_preferred).count(),
            filings: self.filings.len(),
            sentences: self.sentences.len(),
        }
    }
}

/// First file of an earlier run found under `output_dir`, if any.
pub fn existing_output(output_dir: &Path) -> Option<PathBuf> {
    OUTPUT_FILES
        .iter()
        .map(|(dir, file)| output_dir.join(dir).join(file))
        .find(|path| path.exists())
}

/// Refuse to run over an earlier run's output unless `force` is set.
pub fn ensure_output_available(output_dir: &Path, force: bool) -> Result<()> {
    if force {
        return Ok(());
    }
    match existing_output(output_dir) {
        Some(path) => Err(NormalizerError::OutputExists(path)),
        None => Ok(()),
    }
}

/// A hidden per-run directory that receives every output file before it is
/// moved into place. Dropped without `commit`, it removes itself.
#[derive(Debug)]
pub struct StagedOutput {
    output_dir: PathBuf,
    staging: PathBuf,
    committed: bool,
}

impl StagedOutput {
    pub fn create(output_dir: &Path, run_id: Uuid) -> Result<Self> {
        let staging = output_dir.join(format!(".staging-{}", run_id));
        fs::create_dir_all(staging.join(SEC_DIR))?;
        fs::create_dir_all(staging.join(RAG_DIR))?;
        debug!("Staging output in {}", staging.display());
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            staging,
            committed: false,
        })
    }

    pub fn sec_dir(&self) -> PathBuf {
        self.staging.join(SEC_DIR)
    }

    pub fn rag_dir(&self) -> PathBuf {
        self.staging.join(RAG_DIR)
    }

    /// Write the five tables into the staging directory.
    pub fn write_tables(&self, tables: &NormalizedTables) -> Result<TableCounts> {
        let started = Instant::now();
        let sec = self.sec_dir();
        tables::write_entities(&sec.join(ENTITY_TABLE_FILE), &tables.entities)?;
        tables::write_concepts(&sec.join(CONCEPT_TABLE_FILE), &tables.concepts)?;
        tables::write_facts(&sec.join(FACT_TABLE_FILE), &tables.facts)?;
        tables::write_filings(&sec.join(FILING_TABLE_FILE), &tables.filings)?;
        tables::write_sentences(&self.rag_dir().join(SENTENCE_TABLE_FILE), &tables.sentences)?;
        metrics::writer::duration(started.elapsed().as_secs_f64());

        let counts = tables.counts();
        info!(
            "Wrote tables: {} entities, {} concepts, {} facts ({} preferred), {} filings, {} sentences",
            counts.entities,
            counts.concepts,
            counts.facts,
            counts.preferred_facts,
            counts.filings,
            counts.sentences
        );
        Ok(counts)
    }

    /// Move the staged files into the output directory. With `force`, files
    /// of an earlier run are replaced; files this run did not produce are
    /// removed only if they belong to the run layout.
    pub fn commit(mut self, force: bool) -> Result<PathBuf> {
        ensure_output_available(&self.output_dir, force)?;
        for dir in [SEC_DIR, RAG_DIR] {
            fs::create_dir_all(self.output_dir.join(dir))?;
        }
        for (dir, file) in OUTPUT_FILES {
            let staged = self.staging.join(dir).join(file);
            let target = self.output_dir.join(dir).join(file);
            if staged.exists() {
                fs::rename(&staged, &target)?;
            } else if target.exists() {
                fs::remove_file(&target)?;
                debug!("Removed stale output {}", target.display());
            }
        }
        fs::remove_dir_all(&self.staging)?;
        self.committed = true;
        info!("Output committed to {}", self.output_dir.display());
        Ok(self.output_dir.clone())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.committed || !self.staging.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.staging) {
            warn!("Failed to remove staging directory {}: {}", self.staging.display(), e);
        }
    }
}
