//! Flattening of one company document into fact records.
//!
//! The document shape is `cik`/`entityName` plus
//! `facts -> taxonomy -> concept -> {label, description, units -> unit -> [datapoint]}`.
//! Concept metadata goes to its own stream so labels are never repeated per
//! fact. Only `end` and `val` are mandatory on a datapoint; anything else that
//! is missing stays `None`. A malformed datapoint or nested node is rejected
//! on its own and recorded as a defect with its JSON path.

use super::period;
use crate::common::constants::{KEY_CIK, KEY_ENTITY_NAME, KEY_FACTS};
use crate::common::error::DocumentError;
use crate::common::types::{Cik, ConceptRow, FlatFact, RecordDefect, SourceSeq};
use crate::observability::metrics;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, instrument};

/// Entity identity as seen in one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityObservation {
    pub cik: Cik,
    pub name: String,
    /// The document needed truncation repair
    pub partial: bool,
}

/// Everything one document contributes to the merge
#[derive(Debug, Clone)]
pub struct FlattenedDocument {
    pub entity: EntityObservation,
    /// Every concept node seen, including ones without datapoints
    pub concepts: Vec<ConceptRow>,
    pub facts: Vec<FlatFact>,
    pub defects: Vec<RecordDefect>,
}

/// Flatten a parsed (original or repaired) document.
///
/// Fails the whole document only when its identity or `facts` root is
/// missing or malformed.
#[instrument(skip(document), fields(doc = doc_index))]
pub fn flatten_document(
    doc_index: u32,
    document: &Value,
    partial: bool,
) -> Result<FlattenedDocument, DocumentError> {
    let started = Instant::now();
    let result = flatten_inner(doc_index, document, partial);
    match &result {
        Ok(flat) => {
            debug!(
                "Flattened {} facts, {} concepts, {} defects for {}",
                flat.facts.len(),
                flat.concepts.len(),
                flat.defects.len(),
                flat.entity.cik
            );
            metrics::flatten::document_processed(
                flat.facts.len(),
                flat.defects.len(),
                started.elapsed().as_secs_f64(),
            );
        }
        Err(_) => metrics::flatten::document_failed(),
    }
    result
}

fn flatten_inner(
    doc_index: u32,
    document: &Value,
    partial: bool,
) -> Result<FlattenedDocument, DocumentError> {
    let root = document
        .as_object()
        .ok_or_else(|| DocumentError::Invalid("document is not a JSON object".to_string()))?;

    let cik = root
        .get(KEY_CIK)
        .and_then(Cik::from_json)
        .ok_or_else(|| DocumentError::Invalid(format!("missing or non-numeric '{}'", KEY_CIK)))?;

    let name = root
        .get(KEY_ENTITY_NAME)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            DocumentError::Invalid(format!("missing or empty '{}'", KEY_ENTITY_NAME))
        })?
        .to_string();

    let taxonomies = root
        .get(KEY_FACTS)
        .and_then(Value::as_object)
        .ok_or_else(|| DocumentError::Invalid(format!("missing or non-object '{}'", KEY_FACTS)))?;

    let mut walker = Walker {
        cik,
        doc_index,
        ordinal: 0,
        concepts: Vec::new(),
        facts: Vec::new(),
        defects: Vec::new(),
    };

    for (taxonomy, concepts) in taxonomies {
        match concepts.as_object() {
            Some(concepts) => walker.taxonomy(taxonomy, concepts),
            None => walker.defect(taxonomy.clone(), "taxonomy node is not an object"),
        }
    }

    Ok(FlattenedDocument {
        entity: EntityObservation { cik, name, partial },
        concepts: walker.concepts,
        facts: walker.facts,
        defects: walker.defects,
    })
}

struct Walker {
    cik: Cik,
    doc_index: u32,
    ordinal: u64,
    concepts: Vec<ConceptRow>,
    facts: Vec<FlatFact>,
    defects: Vec<RecordDefect>,
}

impl Walker {
    fn defect(&mut self, path: String, message: impl Into<String>) {
        let message = message.into();
        debug!("Record defect at {}: {}", path, message);
        self.defects.push(RecordDefect { path, message });
    }

    fn taxonomy(&mut self, taxonomy: &str, concepts: &Map<String, Value>) {
        for (concept, node) in concepts {
            let path = format!("{}.{}", taxonomy, concept);
            let Some(node) = node.as_object() else {
                self.defect(path, "concept node is not an object");
                continue;
            };

            self.concepts.push(ConceptRow {
                taxonomy: taxonomy.to_string(),
                concept: concept.clone(),
                label: text_field(node, "label"),
                description: text_field(node, "description"),
            });

            match node.get("units") {
                None | Some(Value::Null) => {}
                Some(Value::Object(units)) => self.units(taxonomy, concept, &path, units),
                Some(_) => self.defect(format!("{}.units", path), "units node is not an object"),
            }
        }
    }

    fn units(&mut self, taxonomy: &str, concept: &str, path: &str, units: &Map<String, Value>) {
        for (unit, datapoints) in units {
            let unit_path = format!("{}.{}", path, unit);
            let Some(datapoints) = datapoints.as_array() else {
                self.defect(unit_path, "unit node is not an array");
                continue;
            };

            for (i, datapoint) in datapoints.iter().enumerate() {
                let ordinal = self.ordinal;
                self.ordinal += 1;
                let dp_path = format!("{}[{}]", unit_path, i);

                let parsed = datapoint
                    .as_object()
                    .ok_or_else(|| "datapoint is not an object".to_string())
                    .and_then(parse_datapoint);
                match parsed {
                    Ok(dp) => {
                        let (period_kind, period_id) =
                            period::classify(dp.start, dp.end, dp.fy, dp.fp.as_deref());
                        self.facts.push(FlatFact {
                            cik: self.cik,
                            taxonomy: taxonomy.to_string(),
                            concept: concept.to_string(),
                            unit: unit.clone(),
                            value: dp.val,
                            start_date: dp.start,
                            end_date: dp.end,
                            fiscal_year: dp.fy,
                            fiscal_period: dp.fp,
                            form: dp.form,
                            filed_date: dp.filed,
                            accession: dp.accn,
                            frame: dp.frame,
                            period_kind,
                            period_id,
                            source_seq: SourceSeq {
                                document: self.doc_index,
                                ordinal,
                            },
                        });
                    }
                    Err(message) => self.defect(dp_path, message),
                }
            }
        }
    }
}

/// Typed view of one datapoint object
struct Datapoint {
    end: NaiveDate,
    val: f64,
    start: Option<NaiveDate>,
    fy: Option<i32>,
    fp: Option<String>,
    form: Option<String>,
    filed: Option<NaiveDate>,
    accn: Option<String>,
    frame: Option<String>,
}

/// JSON numbers, or strings holding a finite decimal number
fn numeric_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn parse_datapoint(dp: &Map<String, Value>) -> Result<Datapoint, String> {
    let end = date_field(dp, "end")?.ok_or_else(|| "missing mandatory 'end'".to_string())?;
    let val = match dp.get("val") {
        None | Some(Value::Null) => return Err("missing mandatory 'val'".to_string()),
        Some(v) => numeric_value(v).ok_or_else(|| format!("non-numeric 'val': {}", v))?,
    };

    let fy = match dp.get("fy") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| format!("non-integer 'fy': {}", v))?,
        ),
    };

    Ok(Datapoint {
        end,
        val,
        start: date_field(dp, "start")?,
        fy,
        fp: string_field(dp, "fp"),
        form: string_field(dp, "form"),
        filed: date_field(dp, "filed")?,
        accn: string_field(dp, "accn"),
        frame: string_field(dp, "frame"),
    })
}

fn date_field(dp: &Map<String, Value>, key: &str) -> Result<Option<NaiveDate>, String> {
    match dp.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|e| format!("invalid '{}' date '{}': {}", key, s, e)),
        Some(other) => Err(format!("'{}' is not a date string: {}", key, other)),
    }
}

/// Optional string field; empty strings count as absent
fn string_field(dp: &Map<String, Value>, key: &str) -> Option<String> {
    dp.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text_field(node: &Map<String, Value>, key: &str) -> String {
    node.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
