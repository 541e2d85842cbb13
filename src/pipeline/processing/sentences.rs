//! Retrieval sentences for preferred Tier-1 facts.

use super::dimensions::Dimensions;
use crate::common::constants::is_tier1;
use crate::common::error::{NormalizerError, Result};
use crate::common::types::{PeriodKind, RankedFact, SentenceRow};
use crate::observability::metrics;
use tracing::debug;

const UNKNOWN: &str = "unknown";

/// Render every preferred fact whose concept is on the Tier-1 list.
pub fn generate_sentences(facts: &[RankedFact], dimensions: &Dimensions) -> Result<Vec<SentenceRow>> {
    let sentences = facts
        .iter()
        .filter(|f| f.is_preferred && is_tier1(&f.fact.concept))
        .map(|f| render_sentence(f, dimensions))
        .collect::<Result<Vec<_>>>()?;

    debug!("Rendered {} sentences from {} facts", sentences.len(), facts.len());
    metrics::merge::sentences(sentences.len());
    Ok(sentences)
}

/// Render one sentence row.
///
/// Asking for a non-preferred or non-Tier-1 fact, or a fact whose concept or
/// entity is missing from the dimensions, is an integrity violation.
pub fn render_sentence(ranked: &RankedFact, dimensions: &Dimensions) -> Result<SentenceRow> {
    let fact = &ranked.fact;
    if !ranked.is_preferred {
        return Err(NormalizerError::Integrity(format!(
            "sentence requested for non-preferred fact {}:{} rank {}",
            fact.taxonomy, fact.concept, ranked.revision_rank
        )));
    }
    if !is_tier1(&fact.concept) {
        return Err(NormalizerError::Integrity(format!(
            "sentence requested for non-Tier-1 concept {}",
            fact.concept
        )));
    }

    let concept = dimensions
        .concept(&fact.taxonomy, &fact.concept)
        .ok_or_else(|| {
            NormalizerError::Integrity(format!(
                "concept {}:{} missing from concept dimension",
                fact.taxonomy, fact.concept
            ))
        })?;
    let entity = dimensions
        .entities
        .binary_search_by(|e| e.cik.cmp(&fact.cik))
        .map(|i| &dimensions.entities[i])
        .map_err(|_| {
            NormalizerError::Integrity(format!("entity {} missing from entity dimension", fact.cik))
        })?;

    let label = if concept.label.trim().is_empty() {
        fact.concept.as_str()
    } else {
        concept.label.as_str()
    };
    let period = match (fact.period_kind, fact.start_date) {
        (PeriodKind::Duration, Some(start)) => {
            format!("for period {} to {}", start, fact.end_date)
        }
        _ => format!("as of {}", fact.end_date),
    };
    let filed = fact
        .filed_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let sentence = format!(
        "{} reported {} = {} {} {} (Form {}, filed {}, accession {}).",
        entity.entity_name,
        label,
        format_value(fact.value),
        fact.unit,
        period,
        fact.form.as_deref().unwrap_or(UNKNOWN),
        filed,
        fact.accession.as_deref().unwrap_or(UNKNOWN),
    );

    Ok(SentenceRow {
        cik: fact.cik,
        entity_name: entity.entity_name.clone(),
        taxonomy: fact.taxonomy.clone(),
        concept: fact.concept.clone(),
        label: label.to_string(),
        unit: fact.unit.clone(),
        value: fact.value,
        start_date: fact.start_date,
        end_date: fact.end_date,
        period_kind: fact.period_kind,
        period_id: fact.period_id.clone(),
        fiscal_year: fact.fiscal_year,
        fiscal_period: fact.fiscal_period.clone(),
        form: fact.form.clone(),
        filed_date: fact.filed_date,
        accession: fact.accession.clone(),
        sentence,
    })
}

/// Thousands-separated; no decimals when integral, two otherwise.
pub fn format_value(value: f64) -> String {
    let plain = if value.is_finite() && value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    };

    let (sign, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain.as_str()),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, c) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}
