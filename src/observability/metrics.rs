//! Metrics for the normalization run
//!
//! Every metric name lives in [`MetricName`] so recording sites never use
//! string literals. Recording goes through the `metrics` facade; a Prometheus
//! recorder is installed once per process and its snapshot is rendered into
//! the run output.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Scanner
    ScannerDocumentsValid,
    ScannerDocumentsEmpty,
    ScannerDocumentsUnreadable,
    ScannerDocumentBytes,

    // Repair
    RepairAttempts,
    RepairSuccess,
    RepairFailure,
    RepairRecoveredRatio,

    // Flatten
    FlattenDocumentsProcessed,
    FlattenDocumentsFailed,
    FlattenFactsEmitted,
    FlattenRecordDefects,
    FlattenDuration,

    // Dimensions / ranking / sentences
    DimensionConceptConflicts,
    RankGroups,
    RankPreferredFacts,
    SentencesRendered,

    // Writer
    WriterRowsWritten,
    WriterDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ScannerDocumentsValid => "facts_scanner_documents_valid_total",
            MetricName::ScannerDocumentsEmpty => "facts_scanner_documents_empty_total",
            MetricName::ScannerDocumentsUnreadable => "facts_scanner_documents_unreadable_total",
            MetricName::ScannerDocumentBytes => "facts_scanner_document_bytes",

            MetricName::RepairAttempts => "facts_repair_attempts_total",
            MetricName::RepairSuccess => "facts_repair_success_total",
            MetricName::RepairFailure => "facts_repair_failure_total",
            MetricName::RepairRecoveredRatio => "facts_repair_recovered_ratio",

            MetricName::FlattenDocumentsProcessed => "facts_flatten_documents_processed_total",
            MetricName::FlattenDocumentsFailed => "facts_flatten_documents_failed_total",
            MetricName::FlattenFactsEmitted => "facts_flatten_facts_emitted_total",
            MetricName::FlattenRecordDefects => "facts_flatten_record_defects_total",
            MetricName::FlattenDuration => "facts_flatten_duration_seconds",

            MetricName::DimensionConceptConflicts => "facts_dimension_concept_conflicts_total",
            MetricName::RankGroups => "facts_rank_groups_total",
            MetricName::RankPreferredFacts => "facts_rank_preferred_facts_total",
            MetricName::SentencesRendered => "facts_sentences_rendered_total",

            MetricName::WriterRowsWritten => "facts_writer_rows_written_total",
            MetricName::WriterDuration => "facts_writer_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder. Idempotent; later calls are no-ops.
pub fn init() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
            debug!("Prometheus recorder installed");
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

/// Render the current snapshot in Prometheus text format, if a recorder is
/// installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

pub mod scanner {
    use super::MetricName;

    pub fn document_valid(bytes: u64) {
        ::metrics::counter!(MetricName::ScannerDocumentsValid.as_str()).increment(1);
        ::metrics::histogram!(MetricName::ScannerDocumentBytes.as_str()).record(bytes as f64);
    }

    pub fn document_empty() {
        ::metrics::counter!(MetricName::ScannerDocumentsEmpty.as_str()).increment(1);
    }

    pub fn document_unreadable() {
        ::metrics::counter!(MetricName::ScannerDocumentsUnreadable.as_str()).increment(1);
    }
}

pub mod repair {
    use super::MetricName;

    pub fn attempt() {
        ::metrics::counter!(MetricName::RepairAttempts.as_str()).increment(1);
    }

    pub fn success(recovered: usize, original: usize) {
        ::metrics::counter!(MetricName::RepairSuccess.as_str()).increment(1);
        if original > 0 {
            ::metrics::histogram!(MetricName::RepairRecoveredRatio.as_str())
                .record(recovered as f64 / original as f64);
        }
    }

    pub fn failure() {
        ::metrics::counter!(MetricName::RepairFailure.as_str()).increment(1);
    }
}

pub mod flatten {
    use super::MetricName;

    pub fn document_processed(facts: usize, defects: usize, secs: f64) {
        ::metrics::counter!(MetricName::FlattenDocumentsProcessed.as_str()).increment(1);
        ::metrics::counter!(MetricName::FlattenFactsEmitted.as_str()).increment(facts as u64);
        ::metrics::counter!(MetricName::FlattenRecordDefects.as_str()).increment(defects as u64);
        ::metrics::histogram!(MetricName::FlattenDuration.as_str()).record(secs);
    }

    pub fn document_failed() {
        ::metrics::counter!(MetricName::FlattenDocumentsFailed.as_str()).increment(1);
    }
}

pub mod merge {
    use super::MetricName;

    pub fn concept_conflicts(count: usize) {
        ::metrics::counter!(MetricName::DimensionConceptConflicts.as_str()).increment(count as u64);
    }

    pub fn ranked(groups: usize, preferred: usize) {
        ::metrics::counter!(MetricName::RankGroups.as_str()).increment(groups as u64);
        ::metrics::counter!(MetricName::RankPreferredFacts.as_str()).increment(preferred as u64);
    }

    pub fn sentences(count: usize) {
        ::metrics::counter!(MetricName::SentencesRendered.as_str()).increment(count as u64);
    }
}

pub mod writer {
    use super::MetricName;

    pub fn table_written(table: &'static str, rows: usize) {
        ::metrics::counter!(MetricName::WriterRowsWritten.as_str(), "table" => table)
            .increment(rows as u64);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::WriterDuration.as_str()).record(secs);
    }
}
