//! Run orchestration.
//!
//! Documents are scanned, repaired and flattened independently on a bounded
//! worker pool. Once every worker has reported, the flattened streams are
//! merged in document order into the dimensions, ranked per entity, rendered
//! into sentences and written through a staging directory.

use super::cancel::CancellationToken;
use super::ingestion::{self, content_digest, DocumentRef, ScanOutcome};
use super::processing::{
    flatten_document, generate_sentences, project_filings, rank_facts, DimensionBuilder,
    Dimensions, FlattenedDocument,
};
use super::storage::{ensure_output_available, Manifest, ManifestRecorder, NormalizedTables, StagedOutput};
use crate::common::constants::METRICS_FILE;
use crate::common::error::{DocumentError, NormalizerError, Result};
use crate::common::types::{Cik, FlatFact, RankedFact, Stage};
use crate::config::RunConfig;
use crate::observability::metrics;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What one document worker produced
#[derive(Debug)]
pub enum DocumentResult {
    Skipped {
        size: u64,
    },
    Failed {
        bytes: u64,
        sha256: Option<String>,
        error: DocumentError,
    },
    Processed {
        bytes: u64,
        sha256: String,
        flat: FlattenedDocument,
        recovered_bytes: Option<usize>,
    },
    /// Cancellation was observed before the document was started
    Cancelled,
}

#[derive(Debug)]
struct DocumentReport {
    doc: DocumentRef,
    result: DocumentResult,
}

/// Result of a committed run
#[derive(Debug)]
pub struct RunSummary {
    pub manifest: Manifest,
    pub tables: NormalizedTables,
    pub output_dir: PathBuf,
}

/// Scan, repair and flatten one document. Blocking.
pub fn process_document(doc: &DocumentRef, min_bytes: u64) -> DocumentResult {
    let bytes = match ingestion::scan(doc, min_bytes) {
        ScanOutcome::Valid { bytes } => bytes,
        ScanOutcome::Empty { size } => return DocumentResult::Skipped { size },
        ScanOutcome::Unreadable(e) => {
            return DocumentResult::Failed {
                bytes: 0,
                sha256: None,
                error: DocumentError::Unreadable(e),
            }
        }
    };
    let size = bytes.len() as u64;
    let sha256 = content_digest(&bytes);

    let (value, recovered_bytes) = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => (value, None),
        Err(parse_error) => {
            debug!("{} does not parse ({}), attempting repair", doc.name, parse_error);
            match ingestion::repair_truncated(&bytes, &doc.name) {
                Ok(repaired) => (repaired.document, Some(repaired.recovered_bytes)),
                Err(e) => {
                    return DocumentResult::Failed {
                        bytes: size,
                        sha256: Some(sha256),
                        error: DocumentError::Unrecoverable(e),
                    }
                }
            }
        }
    };

    match flatten_document(doc.index, &value, recovered_bytes.is_some()) {
        Ok(flat) => DocumentResult::Processed {
            bytes: size,
            sha256,
            flat,
            recovered_bytes,
        },
        Err(error) => DocumentResult::Failed {
            bytes: size,
            sha256: Some(sha256),
            error,
        },
    }
}

/// Run the whole normalization and commit its output.
#[instrument(skip_all, fields(input = %config.input_dir.display()))]
pub async fn run_pipeline(config: &RunConfig, cancel: CancellationToken) -> Result<RunSummary> {
    config.validate()?;
    ensure_output_available(&config.output_dir, config.force)?;
    let docs = ingestion::discover(&config.input_dir)?;

    let run_id = Uuid::new_v4();
    let mut recorder = ManifestRecorder::new(run_id);
    let snapshot_date = recorder.started_at().date_naive();
    info!(
        "🚀 Starting normalization run {} over {} documents (concurrency {})",
        run_id,
        docs.len(),
        config.concurrency
    );

    let mut flattened =
        collect_documents(config, docs, &cancel, &mut recorder, process_document).await?;
    flattened.sort_by_key(|(doc, _)| doc.index);
    let counts = recorder.counts();
    info!(
        "Document phase complete: {} valid, {} repaired, {} skipped, {} failed",
        counts.valid, counts.repaired, counts.skipped_empty, counts.failed
    );

    let (dimensions, tables) = merge(flattened, snapshot_date).await?;
    if cancel.is_cancelled() {
        warn!("Run {} cancelled before writing output", run_id);
        return Err(NormalizerError::Cancelled);
    }

    let staged = StagedOutput::create(&config.output_dir, run_id)?;
    let table_counts = staged.write_tables(&tables)?;
    let manifest = recorder.finish(config, snapshot_date, table_counts, dimensions.conflicts);
    manifest.write(&staged.sec_dir())?;
    if let Some(snapshot) = metrics::render() {
        fs::write(staged.sec_dir().join(METRICS_FILE), snapshot)?;
    }
    let output_dir = staged.commit(config.force)?;

    if manifest.has_failures() {
        warn!(
            "⚠️ Run {} finished with {} failed documents and {} record defects",
            run_id, manifest.outcomes.failed, manifest.outcomes.record_defects
        );
    } else {
        info!(
            "🎉 Run {} finished in {:.1}s: {} facts, {} sentences",
            run_id, manifest.elapsed_seconds, manifest.tables.facts, manifest.tables.sentences
        );
    }

    Ok(RunSummary {
        manifest,
        tables,
        output_dir,
    })
}

/// Per-document work run on the blocking pool
type DocumentWorker = fn(&DocumentRef, u64) -> DocumentResult;

/// Fan documents out to the worker pool and record each outcome. Returns the
/// successfully flattened documents in completion order.
async fn collect_documents(
    config: &RunConfig,
    docs: Vec<DocumentRef>,
    cancel: &CancellationToken,
    recorder: &mut ManifestRecorder,
    worker: DocumentWorker,
) -> Result<Vec<(DocumentRef, FlattenedDocument)>> {
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut workers: JoinSet<DocumentReport> = JoinSet::new();

    for doc in docs {
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let timeout = config.document_timeout;
        let min_bytes = config.min_document_bytes;

        workers.spawn(async move {
            let Ok(permit) = semaphore.acquire_owned().await else {
                return DocumentReport { doc, result: DocumentResult::Cancelled };
            };
            if cancel.is_cancelled() {
                return DocumentReport { doc, result: DocumentResult::Cancelled };
            }

            // The permit lives as long as the blocking work, which outlives a timeout
            let worker_doc = doc.clone();
            let task = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                worker(&worker_doc, min_bytes)
            });
            let result = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => DocumentResult::Failed {
                    bytes: 0,
                    sha256: None,
                    error: DocumentError::WorkerPanic(join_error.to_string()),
                },
                Err(_) => DocumentResult::Failed {
                    bytes: 0,
                    sha256: None,
                    error: DocumentError::Timeout(timeout),
                },
            };
            DocumentReport { doc, result }
        });
    }

    let mut flattened = Vec::new();
    while let Some(joined) = workers.join_next().await {
        let DocumentReport { doc, result } = joined?;

        match result {
            DocumentResult::Cancelled => {}
            DocumentResult::Skipped { size } => {
                log_document(config, &doc, "skipped (near-empty)");
                recorder.record_skipped(&doc.name, size);
            }
            DocumentResult::Failed { bytes, sha256, error } => {
                recorder.record_failure(&doc.name, bytes, sha256, &error);
                if config.fail_fast {
                    workers.abort_all();
                    error!("Fail-fast: aborting run on {}", doc.name);
                    return Err(NormalizerError::FailFast {
                        document: doc.name,
                        stage: error.stage(),
                        message: error.to_string(),
                    });
                }
            }
            DocumentResult::Processed { bytes, sha256, flat, recovered_bytes } => {
                recorder.record_processed(
                    &doc.name,
                    bytes,
                    sha256,
                    flat.facts.len(),
                    &flat.defects,
                    recovered_bytes,
                );
                if config.fail_fast {
                    if let Some(defect) = flat.defects.first() {
                        workers.abort_all();
                        error!("Fail-fast: record defect in {}", doc.name);
                        return Err(NormalizerError::FailFast {
                            document: doc.name,
                            stage: Stage::Flatten,
                            message: format!("record defect at {}: {}", defect.path, defect.message),
                        });
                    }
                }
                let status = if recovered_bytes.is_some() { "repaired" } else { "valid" };
                log_document(config, &doc, status);
                flattened.push((doc, flat));
            }
        }

        if cancel.is_cancelled() {
            workers.abort_all();
            warn!("Cancellation requested, stopping document workers");
            return Err(NormalizerError::Cancelled);
        }
    }

    Ok(flattened)
}

fn log_document(config: &RunConfig, doc: &DocumentRef, status: &str) {
    if config.verbose {
        info!("{}: {}", doc.name, status);
    } else {
        debug!("{}: {}", doc.name, status);
    }
}

/// Barrier step: fold dimensions in document order, rank each entity on its
/// own blocking task, then build filings and sentences.
async fn merge(
    flattened: Vec<(DocumentRef, FlattenedDocument)>,
    snapshot_date: chrono::NaiveDate,
) -> Result<(Dimensions, NormalizedTables)> {
    let mut builder = DimensionBuilder::new();
    let mut by_entity: BTreeMap<Cik, Vec<FlatFact>> = BTreeMap::new();
    for (doc, flat) in flattened {
        builder.add_document(&doc.name, &flat);
        by_entity
            .entry(flat.entity.cik)
            .or_default()
            .extend(flat.facts);
    }
    let dimensions = builder.finish(snapshot_date);

    let mut rankers: JoinSet<(Cik, Vec<RankedFact>)> = JoinSet::new();
    for (cik, facts) in by_entity {
        rankers.spawn_blocking(move || (cik, rank_facts(facts)));
    }
    let mut ranked: BTreeMap<Cik, Vec<RankedFact>> = BTreeMap::new();
    while let Some(joined) = rankers.join_next().await {
        let (cik, facts) = joined?;
        ranked.insert(cik, facts);
    }
    let facts: Vec<RankedFact> = ranked.into_values().flatten().collect();

    check_integrity(&facts, &dimensions)?;
    let filings = project_filings(facts.iter().map(|r| &r.fact));
    let sentences = generate_sentences(&facts, &dimensions)?;

    let tables = NormalizedTables {
        entities: dimensions.entities.clone(),
        concepts: dimensions.concepts.clone(),
        facts,
        filings,
        sentences,
    };
    Ok((dimensions, tables))
}

/// Every fact must reference a known entity and concept.
pub fn check_integrity(facts: &[RankedFact], dimensions: &Dimensions) -> Result<()> {
    for ranked in facts {
        let fact = &ranked.fact;
        if !dimensions.has_entity(fact.cik) {
            return Err(NormalizerError::Integrity(format!(
                "fact references unknown entity {}",
                fact.cik
            )));
        }
        if dimensions.concept(&fact.taxonomy, &fact.concept).is_none() {
            return Err(NormalizerError::Integrity(format!(
                "fact references unknown concept {}:{}",
                fact.taxonomy, fact.concept
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{ConceptRow, EntityRow, PeriodKind, SourceSeq};
    use crate::pipeline::storage::TableCounts;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    const SLOW: &str = "CIK0000000002.json";

    fn stalls_on_slow_document(doc: &DocumentRef, min_bytes: u64) -> DocumentResult {
        if doc.name == SLOW {
            std::thread::sleep(Duration::from_millis(800));
        }
        process_document(doc, min_bytes)
    }

    static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
    static PEAK_IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

    fn counts_in_flight(doc: &DocumentRef, min_bytes: u64) -> DocumentResult {
        let now = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
        PEAK_IN_FLIGHT.fetch_max(now, Ordering::SeqCst);
        let result = stalls_on_slow_document(doc, min_bytes);
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn panics_on_slow_document(doc: &DocumentRef, min_bytes: u64) -> DocumentResult {
        if doc.name == SLOW {
            panic!("worker blew up on {}", doc.name);
        }
        process_document(doc, min_bytes)
    }

    /// Three well-formed documents; the middle one is the slow one
    fn corpus(input: &std::path::Path) -> Vec<DocumentRef> {
        for name in ["CIK0000001750.json", SLOW, "CIK0000000003.json"] {
            fs::write(input.join(name), body()).unwrap();
        }
        ingestion::discover(input).unwrap()
    }

    fn short_timeout(input: &std::path::Path, output: &std::path::Path) -> RunConfig {
        let mut config = RunConfig::new(input, output);
        config.concurrency = 2;
        config.document_timeout = Duration::from_millis(100);
        config
    }

    fn write_doc(dir: &std::path::Path, name: &str, body: &str) -> DocumentRef {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        DocumentRef {
            index: 0,
            name: name.to_string(),
            path,
        }
    }

    fn body() -> String {
        serde_json::to_string(&json!({
            "cik": 1750,
            "entityName": "AAR Corp",
            "facts": {"us-gaap": {"Assets": {"label": "Assets", "description": "", "units": {"USD": [
                {"end": "2023-05-31", "val": 1000, "accn": "a1", "form": "10-K", "filed": "2023-07-20"},
                {"end": "2023-08-31", "val": 1100, "accn": "a2", "form": "10-Q", "filed": "2023-09-20"}
            ]}}}}
        }))
        .unwrap()
    }

    #[test]
    fn process_document_repairs_truncated_input() {
        let dir = tempdir().unwrap();
        let text = body();
        let cut = text.find("\"a2\"").unwrap();
        let doc = write_doc(dir.path(), "CIK0000001750.json", &text[..cut]);

        match process_document(&doc, 100) {
            DocumentResult::Processed { flat, recovered_bytes, .. } => {
                assert!(recovered_bytes.is_some());
                assert!(flat.entity.partial);
                assert_eq!(flat.facts.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn process_document_reports_each_failure_kind() {
        let dir = tempdir().unwrap();
        let empty = write_doc(dir.path(), "CIK0000000001.json", "{}");
        assert!(matches!(process_document(&empty, 100), DocumentResult::Skipped { size: 2 }));

        let garbage = write_doc(dir.path(), "CIK0000000002.json", &format!("{{\"cik\": \"{}", "x".repeat(200)));
        match process_document(&garbage, 100) {
            DocumentResult::Failed { error, sha256, .. } => {
                assert_eq!(error.kind(), "unrecoverable");
                assert!(sha256.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        let no_name = write_doc(
            dir.path(),
            "CIK0000000003.json",
            &format!("{{\"cik\": 3, \"facts\": {{}}, \"pad\": \"{}\"}}", "x".repeat(200)),
        );
        match process_document(&no_name, 100) {
            DocumentResult::Failed { error, .. } => assert_eq!(error.kind(), "invalid_document"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn integrity_check_rejects_orphan_facts() {
        let date = NaiveDate::from_ymd_opt(2023, 9, 30).unwrap();
        let dimensions = Dimensions {
            entities: vec![EntityRow {
                cik: Cik(1),
                entity_name: "One".into(),
                last_seen_filing_date: None,
                snapshot_date: date,
                partial: false,
            }],
            concepts: vec![ConceptRow {
                taxonomy: "us-gaap".into(),
                concept: "Assets".into(),
                label: "Assets".into(),
                description: String::new(),
            }],
            conflicts: Vec::new(),
        };
        let fact = |cik: u64, concept: &str| RankedFact {
            fact: FlatFact {
                cik: Cik(cik),
                taxonomy: "us-gaap".into(),
                concept: concept.into(),
                unit: "USD".into(),
                value: 1.0,
                start_date: None,
                end_date: date,
                fiscal_year: None,
                fiscal_period: None,
                form: None,
                filed_date: None,
                accession: None,
                frame: None,
                period_kind: PeriodKind::Instant,
                period_id: date.to_string(),
                source_seq: SourceSeq { document: 0, ordinal: 0 },
            },
            revision_rank: 1,
            is_preferred: true,
        };

        check_integrity(&[fact(1, "Assets")], &dimensions).unwrap();
        assert!(matches!(
            check_integrity(&[fact(2, "Assets")], &dimensions),
            Err(NormalizerError::Integrity(_))
        ));
        assert!(matches!(
            check_integrity(&[fact(1, "Liabilities")], &dimensions),
            Err(NormalizerError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn timed_out_document_fails_alone() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let docs = corpus(input.path());
        let config = short_timeout(input.path(), output.path());
        let mut recorder = ManifestRecorder::new(Uuid::new_v4());

        let flattened = collect_documents(
            &config,
            docs,
            &CancellationToken::new(),
            &mut recorder,
            stalls_on_slow_document,
        )
        .await
        .unwrap();
        assert_eq!(flattened.len(), 2);
        assert!(flattened.iter().all(|(doc, _)| doc.name != SLOW));

        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let manifest = recorder.finish(&config, date, TableCounts::default(), Vec::new());
        assert_eq!(manifest.outcomes.failed, 1);
        assert_eq!(manifest.outcomes.valid, 2);
        assert_eq!(manifest.errors.len(), 1);
        assert_eq!(manifest.errors[0].document, SLOW);
        assert_eq!(manifest.errors[0].kind, "timeout");
        assert!(manifest.has_failures());
    }

    #[tokio::test]
    async fn timeout_aborts_a_fail_fast_run() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let docs = corpus(input.path());
        let mut config = short_timeout(input.path(), output.path());
        config.fail_fast = true;
        let mut recorder = ManifestRecorder::new(Uuid::new_v4());

        let err = collect_documents(
            &config,
            docs,
            &CancellationToken::new(),
            &mut recorder,
            stalls_on_slow_document,
        )
        .await
        .unwrap_err();
        match err {
            NormalizerError::FailFast { document, .. } => assert_eq!(document, SLOW),
            other => panic!("expected fail-fast error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn worker_panic_is_recorded_against_its_document() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let docs = corpus(input.path());
        let config = RunConfig::new(input.path(), output.path());
        let mut recorder = ManifestRecorder::new(Uuid::new_v4());

        let flattened = collect_documents(
            &config,
            docs,
            &CancellationToken::new(),
            &mut recorder,
            panics_on_slow_document,
        )
        .await
        .unwrap();
        assert_eq!(flattened.len(), 2);

        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let manifest = recorder.finish(&config, date, TableCounts::default(), Vec::new());
        assert_eq!(manifest.errors.len(), 1);
        assert_eq!(manifest.errors[0].document, SLOW);
        assert_eq!(manifest.errors[0].kind, "worker_panic");
    }

    #[tokio::test]
    async fn timed_out_work_keeps_its_slot_until_it_finishes() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let docs = corpus(input.path());
        let mut config = short_timeout(input.path(), output.path());
        config.concurrency = 1;
        let mut recorder = ManifestRecorder::new(Uuid::new_v4());

        let flattened = collect_documents(
            &config,
            docs,
            &CancellationToken::new(),
            &mut recorder,
            counts_in_flight,
        )
        .await
        .unwrap();
        assert_eq!(flattened.len(), 2);
        assert_eq!(PEAK_IN_FLIGHT.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.counts().failed, 1);
    }
}
