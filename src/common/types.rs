use crate::common::constants::CIK_WIDTH;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SEC Central Index Key. Rendered zero-padded; never a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub struct Cik(pub u64);

impl Cik {
    /// Parse from the `cik` field of a document, which may be a number or a
    /// numeric string.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_u64().map(Cik),
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                trimmed.parse().ok().map(Cik)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Cik {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = CIK_WIDTH)
    }
}

impl Serialize for Cik {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Pipeline stage names used in logs and the manifest error log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scan,
    Repair,
    Flatten,
    Worker,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scan => "scan",
            Stage::Repair => "repair",
            Stage::Flatten => "flatten",
            Stage::Worker => "worker",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Temporal semantics of a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    /// Value as of a single date (balance-sheet style)
    Instant,
    /// Value accumulated over a start..end interval
    Duration,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Instant => "instant",
            PeriodKind::Duration => "duration",
        }
    }
}

/// Position of a datapoint in the input: document order, then datapoint
/// order inside the document. Last-resort tie-break for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SourceSeq {
    pub document: u32,
    pub ordinal: u64,
}

/// One flattened, period-classified datapoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatFact {
    pub cik: Cik,
    pub taxonomy: String,
    pub concept: String,
    pub unit: String,
    pub value: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: NaiveDate,
    pub fiscal_year: Option<i32>,
    pub fiscal_period: Option<String>,
    pub form: Option<String>,
    pub filed_date: Option<NaiveDate>,
    pub accession: Option<String>,
    /// Calendar frame tag; diagnostic only, never part of any key
    pub frame: Option<String>,
    pub period_kind: PeriodKind,
    pub period_id: String,
    #[serde(skip)]
    pub source_seq: SourceSeq,
}

/// A fact after revision ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedFact {
    #[serde(flatten)]
    pub fact: FlatFact,
    /// Dense rank within the fact's revision group, 1 = current best
    pub revision_rank: u32,
    pub is_preferred: bool,
}

/// Entity dimension row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRow {
    pub cik: Cik,
    pub entity_name: String,
    pub last_seen_filing_date: Option<NaiveDate>,
    pub snapshot_date: NaiveDate,
    pub partial: bool,
}

/// Concept dimension row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConceptRow {
    pub taxonomy: String,
    pub concept: String,
    pub label: String,
    pub description: String,
}

/// One distinct filing referenced by an entity's facts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FilingRow {
    pub cik: Cik,
    pub accession: String,
    pub form: Option<String>,
    pub filed_date: Option<NaiveDate>,
}

/// Retrieval-ready sentence with the provenance of its source fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceRow {
    pub cik: Cik,
    pub entity_name: String,
    pub taxonomy: String,
    pub concept: String,
    pub label: String,
    pub unit: String,
    pub value: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: NaiveDate,
    pub period_kind: PeriodKind,
    pub period_id: String,
    pub fiscal_year: Option<i32>,
    pub fiscal_period: Option<String>,
    pub form: Option<String>,
    pub filed_date: Option<NaiveDate>,
    pub accession: Option<String>,
    pub sentence: String,
}

/// A single datapoint (or nested node) rejected during flattening
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordDefect {
    /// JSON path of the rejected node, e.g. `us-gaap.Assets.USD[3]`
    pub path: String,
    pub message: String,
}
