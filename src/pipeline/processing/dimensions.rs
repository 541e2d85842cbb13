//! Corpus-wide entity and concept dimensions.
//!
//! Documents must be folded in document order. Concept metadata is
//! first-write-wins; a later document offering different text for the same
//! (taxonomy, concept) is recorded as a conflict and otherwise ignored.

use super::flatten::FlattenedDocument;
use crate::common::types::{Cik, ConceptRow, EntityRow, FilingRow, FlatFact};
use crate::observability::metrics;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// A concept whose label or description disagreed across documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConceptConflict {
    pub taxonomy: String,
    pub concept: String,
    pub kept_label: String,
    pub rejected_label: String,
    pub description_differs: bool,
    /// Document that supplied the rejected text
    pub document: String,
}

#[derive(Debug)]
struct EntityState {
    name: String,
    last_seen: Option<NaiveDate>,
    partial: bool,
}

/// Finished dimension tables
#[derive(Debug, Clone, PartialEq)]
pub struct Dimensions {
    pub entities: Vec<EntityRow>,
    pub concepts: Vec<ConceptRow>,
    pub conflicts: Vec<ConceptConflict>,
}

impl Dimensions {
    pub fn has_entity(&self, cik: Cik) -> bool {
        self.entities
            .binary_search_by(|row| row.cik.cmp(&cik))
            .is_ok()
    }

    pub fn concept(&self, taxonomy: &str, concept: &str) -> Option<&ConceptRow> {
        self.concepts
            .binary_search_by(|row| {
                (row.taxonomy.as_str(), row.concept.as_str()).cmp(&(taxonomy, concept))
            })
            .ok()
            .map(|i| &self.concepts[i])
    }
}

#[derive(Debug, Default)]
pub struct DimensionBuilder {
    concepts: BTreeMap<(String, String), ConceptRow>,
    entities: BTreeMap<Cik, EntityState>,
    conflicts: Vec<ConceptConflict>,
    reported: HashSet<(String, String, String)>,
}

impl DimensionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one flattened document into the running dimensions.
    pub fn add_document(&mut self, document_name: &str, flat: &FlattenedDocument) {
        let last_seen = flat.facts.iter().filter_map(|f| f.filed_date).max();
        self.observe_entity(
            flat.entity.cik,
            &flat.entity.name,
            last_seen,
            flat.entity.partial,
        );
        for concept in &flat.concepts {
            self.observe_concept(document_name, concept);
        }
    }

    fn observe_entity(&mut self, cik: Cik, name: &str, last_seen: Option<NaiveDate>, partial: bool) {
        match self.entities.get_mut(&cik) {
            Some(state) => {
                if state.name != name {
                    debug!(
                        "Entity {} seen again as '{}', keeping '{}'",
                        cik, name, state.name
                    );
                }
                state.last_seen = state.last_seen.max(last_seen);
                state.partial |= partial;
            }
            None => {
                self.entities.insert(
                    cik,
                    EntityState {
                        name: name.to_string(),
                        last_seen,
                        partial,
                    },
                );
            }
        }
    }

    fn observe_concept(&mut self, document_name: &str, concept: &ConceptRow) {
        let key = (concept.taxonomy.clone(), concept.concept.clone());
        let Some(kept) = self.concepts.get(&key) else {
            self.concepts.insert(key, concept.clone());
            return;
        };

        if kept.label == concept.label && kept.description == concept.description {
            return;
        }
        // One entry per distinct rejected label is enough to audit
        let report_key = (key.0, key.1, concept.label.clone());
        if !self.reported.insert(report_key) {
            return;
        }
        warn!(
            "Concept {}:{} label conflict in {}: keeping '{}', rejecting '{}'",
            concept.taxonomy, concept.concept, document_name, kept.label, concept.label
        );
        self.conflicts.push(ConceptConflict {
            taxonomy: concept.taxonomy.clone(),
            concept: concept.concept.clone(),
            kept_label: kept.label.clone(),
            rejected_label: concept.label.clone(),
            description_differs: kept.description != concept.description,
            document: document_name.to_string(),
        });
    }

    pub fn finish(self, snapshot_date: NaiveDate) -> Dimensions {
        metrics::merge::concept_conflicts(self.conflicts.len());
        Dimensions {
            entities: self
                .entities
                .into_iter()
                .map(|(cik, state)| EntityRow {
                    cik,
                    entity_name: state.name,
                    last_seen_filing_date: state.last_seen,
                    snapshot_date,
                    partial: state.partial,
                })
                .collect(),
            concepts: self.concepts.into_values().collect(),
            conflicts: self.conflicts,
        }
    }
}

/// Distinct (entity, accession) filings referenced by facts. The first fact
/// carrying an accession decides its form and filed date.
pub fn project_filings<'a>(facts: impl IntoIterator<Item = &'a FlatFact>) -> Vec<FilingRow> {
    let mut filings: BTreeMap<(Cik, &'a str), FilingRow> = BTreeMap::new();
    for fact in facts {
        let Some(accession) = fact.accession.as_deref() else {
            continue;
        };
        filings
            .entry((fact.cik, accession))
            .or_insert_with(|| FilingRow {
                cik: fact.cik,
                accession: accession.to_string(),
                form: fact.form.clone(),
                filed_date: fact.filed_date,
            });
    }
    filings.into_values().collect()
}
