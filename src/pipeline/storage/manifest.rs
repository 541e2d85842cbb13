//! Run manifest: per-document outcomes, counts and the structured error log.

use crate::common::error::{DocumentError, Result};
use crate::common::types::{RecordDefect, Stage};
use crate::config::RunConfig;
use crate::pipeline::processing::ConceptConflict;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub const RECORD_DEFECT_KIND: &str = "record_defect";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOutcome {
    Valid,
    Repaired,
    SkippedEmpty,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentEntry {
    pub name: String,
    pub outcome: DocumentOutcome,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub facts: usize,
    pub record_defects: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub document: String,
    pub stage: Stage,
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub total_documents: usize,
    pub valid: usize,
    pub repaired: usize,
    pub skipped_empty: usize,
    pub failed: usize,
    pub record_defects: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub entities: usize,
    pub concepts: usize,
    pub facts: usize,
    pub preferred_facts: usize,
    pub filings: usize,
    pub sentences: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub snapshot_date: NaiveDate,
    pub elapsed_seconds: f64,
    pub options: RunConfig,
    pub outcomes: OutcomeCounts,
    pub tables: TableCounts,
    pub concept_conflicts: Vec<ConceptConflict>,
    pub errors: Vec<ErrorRecord>,
    pub documents: Vec<DocumentEntry>,
}

impl Manifest {
    /// True when any document failed or any record was rejected. A run can
    /// produce tables and still report failures here.
    pub fn has_failures(&self) -> bool {
        self.outcomes.failed > 0 || self.outcomes.record_defects > 0
    }

    /// Write `manifest.json` and `documents.ndjson` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let manifest_path = dir.join(crate::common::constants::MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(&manifest_path, bytes)?;

        let log_path = dir.join(crate::common::constants::DOCUMENT_LOG_FILE);
        let mut writer = BufWriter::new(File::create(&log_path)?);
        for entry in &self.documents {
            let line = serde_json::to_string(entry)?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;

        info!(
            "Manifest written to {} ({} documents, {} errors)",
            manifest_path.display(),
            self.documents.len(),
            self.errors.len()
        );
        Ok(())
    }
}

/// Collects document outcomes as workers finish
#[derive(Debug)]
pub struct ManifestRecorder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    counts: OutcomeCounts,
    documents: Vec<DocumentEntry>,
    errors: Vec<ErrorRecord>,
}

impl ManifestRecorder {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            started: Instant::now(),
            counts: OutcomeCounts::default(),
            documents: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn counts(&self) -> &OutcomeCounts {
        &self.counts
    }

    pub fn record_skipped(&mut self, name: &str, size: u64) {
        self.counts.total_documents += 1;
        self.counts.skipped_empty += 1;
        self.documents.push(DocumentEntry {
            name: name.to_string(),
            outcome: DocumentOutcome::SkippedEmpty,
            bytes: size,
            sha256: None,
            facts: 0,
            record_defects: 0,
            recovered_bytes: None,
        });
    }

    pub fn record_failure(
        &mut self,
        name: &str,
        bytes: u64,
        sha256: Option<String>,
        error: &DocumentError,
    ) {
        warn!("Document {} failed during {}: {}", name, error.stage(), error);
        self.counts.total_documents += 1;
        self.counts.failed += 1;
        self.documents.push(DocumentEntry {
            name: name.to_string(),
            outcome: DocumentOutcome::Failed,
            bytes,
            sha256,
            facts: 0,
            record_defects: 0,
            recovered_bytes: None,
        });
        self.errors.push(ErrorRecord {
            document: name.to_string(),
            stage: error.stage(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            path: None,
        });
    }

    pub fn record_processed(
        &mut self,
        name: &str,
        bytes: u64,
        sha256: String,
        facts: usize,
        defects: &[RecordDefect],
        recovered_bytes: Option<usize>,
    ) {
        self.counts.total_documents += 1;
        let outcome = if recovered_bytes.is_some() {
            self.counts.repaired += 1;
            DocumentOutcome::Repaired
        } else {
            self.counts.valid += 1;
            DocumentOutcome::Valid
        };
        self.counts.record_defects += defects.len();

        self.documents.push(DocumentEntry {
            name: name.to_string(),
            outcome,
            bytes,
            sha256: Some(sha256),
            facts,
            record_defects: defects.len(),
            recovered_bytes,
        });
        self.errors.extend(defects.iter().map(|d| ErrorRecord {
            document: name.to_string(),
            stage: Stage::Flatten,
            kind: RECORD_DEFECT_KIND.to_string(),
            message: d.message.clone(),
            path: Some(d.path.clone()),
        }));
    }

    /// Seal the manifest. Documents and errors are sorted by document name
    /// so the output does not depend on worker completion order.
    pub fn finish(
        mut self,
        options: &RunConfig,
        snapshot_date: NaiveDate,
        tables: TableCounts,
        concept_conflicts: Vec<ConceptConflict>,
    ) -> Manifest {
        self.documents.sort_by(|a, b| a.name.cmp(&b.name));
        // Stable: defects of one document keep their traversal order
        self.errors.sort_by(|a, b| a.document.cmp(&b.document));

        Manifest {
            run_id: self.run_id,
            started_at: self.started_at,
            snapshot_date,
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
            options: options.clone(),
            outcomes: self.counts,
            tables,
            concept_conflicts,
            errors: self.errors,
            documents: self.documents,
        }
    }
}
