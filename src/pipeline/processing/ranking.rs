//! Revision ranking.
//!
//! Facts describing the same economic quantity (same entity, taxonomy,
//! concept, unit, period bounds and fiscal tags) compete across filings. Each
//! group gets a total order and dense ranks from 1; rank 1 is preferred.
//! Nothing is discarded.

use crate::common::constants::form_priority;
use crate::common::types::{Cik, FlatFact, RankedFact};
use crate::observability::metrics;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey<'a> {
    cik: Cik,
    taxonomy: &'a str,
    concept: &'a str,
    unit: &'a str,
    start: Option<NaiveDate>,
    end: NaiveDate,
    fiscal_year: Option<i32>,
    fiscal_period: Option<&'a str>,
}

impl<'a> GroupKey<'a> {
    fn of(fact: &'a FlatFact) -> Self {
        Self {
            cik: fact.cik,
            taxonomy: &fact.taxonomy,
            concept: &fact.concept,
            unit: &fact.unit,
            start: fact.start_date,
            end: fact.end_date,
            fiscal_year: fact.fiscal_year,
            fiscal_period: fact.fiscal_period.as_deref(),
        }
    }
}

/// Total order inside a group; the first element is preferred.
///
/// Latest filed date first (undated last), then form priority, then
/// accession ascending (missing last), then ingestion order.
pub fn revision_order(a: &FlatFact, b: &FlatFact) -> Ordering {
    descending_none_last(a.filed_date, b.filed_date)
        .then_with(|| form_priority(a.form.as_deref()).cmp(&form_priority(b.form.as_deref())))
        .then_with(|| ascending_none_last(a.accession.as_deref(), b.accession.as_deref()))
        .then_with(|| a.source_seq.cmp(&b.source_seq))
}

fn descending_none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn ascending_none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Assign revision ranks. Output keeps the input order.
pub fn rank_facts(facts: Vec<FlatFact>) -> Vec<RankedFact> {
    let mut ranks = vec![0u32; facts.len()];
    let groups = {
        let mut groups: HashMap<GroupKey<'_>, Vec<usize>> = HashMap::new();
        for (i, fact) in facts.iter().enumerate() {
            groups.entry(GroupKey::of(fact)).or_default().push(i);
        }

        for members in groups.values_mut() {
            members.sort_by(|&a, &b| revision_order(&facts[a], &facts[b]));
            for (position, &i) in members.iter().enumerate() {
                ranks[i] = position as u32 + 1;
            }
        }
        groups.len()
    };

    let preferred = ranks.iter().filter(|&&r| r == 1).count();
    debug!(
        "Ranked {} facts into {} revision groups",
        facts.len(),
        groups
    );
    metrics::merge::ranked(groups, preferred);

    facts
        .into_iter()
        .zip(ranks)
        .map(|(fact, revision_rank)| RankedFact {
            fact,
            revision_rank,
            is_preferred: revision_rank == 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{PeriodKind, SourceSeq};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn fact(ordinal: u64, form: Option<&str>, filed: Option<&str>, accession: Option<&str>) -> FlatFact {
        FlatFact {
            cik: Cik(320193),
            taxonomy: "us-gaap".to_string(),
            concept: "NetIncomeLoss".to_string(),
            unit: "USD".to_string(),
            value: 1.0,
            start_date: Some(date("2022-09-25")),
            end_date: date("2023-09-30"),
            fiscal_year: Some(2023),
            fiscal_period: Some("FY".to_string()),
            form: form.map(str::to_string),
            filed_date: filed.map(date),
            accession: accession.map(str::to_string),
            frame: None,
            period_kind: PeriodKind::Duration,
            period_id: "2023-FY".to_string(),
            source_seq: SourceSeq { document: 0, ordinal },
        }
    }

    fn ranks(ranked: &[RankedFact]) -> Vec<u32> {
        ranked.iter().map(|r| r.revision_rank).collect()
    }

    #[test]
    fn annual_report_filed_later_wins() {
        let ranked = rank_facts(vec![
            fact(0, Some("10-Q"), Some("2023-08-04"), Some("a")),
            fact(1, Some("10-K"), Some("2023-11-03"), Some("b")),
        ]);
        assert_eq!(ranks(&ranked), vec![2, 1]);
        assert!(!ranked[0].is_preferred);
        assert!(ranked[1].is_preferred);
    }

    #[test]
    fn form_priority_breaks_filed_date_ties() {
        let ranked = rank_facts(vec![
            fact(0, Some("8-K"), Some("2023-11-03"), Some("a")),
            fact(1, Some("S-1"), Some("2023-11-03"), Some("b")),
            fact(2, Some("10-Q"), Some("2023-11-03"), Some("c")),
            fact(3, Some("10-K/A"), Some("2023-11-03"), Some("d")),
        ]);
        assert_eq!(ranks(&ranked), vec![3, 4, 2, 1]);
    }

    #[test]
    fn missing_filed_date_ranks_last() {
        let ranked = rank_facts(vec![
            fact(0, Some("10-K"), None, Some("a")),
            fact(1, Some("8-K"), Some("2001-01-01"), Some("b")),
        ]);
        assert_eq!(ranks(&ranked), vec![2, 1]);
    }

    #[test]
    fn residual_ties_use_accession_then_ingestion_order() {
        let ranked = rank_facts(vec![
            fact(0, Some("10-K"), Some("2023-11-03"), None),
            fact(1, Some("10-K"), Some("2023-11-03"), Some("0002")),
            fact(2, Some("10-K"), Some("2023-11-03"), Some("0001")),
            fact(3, Some("10-K"), Some("2023-11-03"), None),
        ]);
        assert_eq!(ranks(&ranked), vec![3, 2, 1, 4]);
    }

    #[test]
    fn groups_are_ranked_independently_and_densely() {
        let mut other_unit = fact(2, Some("10-Q"), Some("2023-08-04"), Some("c"));
        other_unit.unit = "EUR".to_string();
        let mut other_period = fact(3, Some("10-Q"), Some("2023-08-04"), Some("d"));
        other_period.fiscal_period = Some("Q3".to_string());

        let ranked = rank_facts(vec![
            fact(0, Some("10-K"), Some("2023-11-03"), Some("a")),
            fact(1, Some("10-K"), Some("2024-11-01"), Some("b")),
            other_unit,
            other_period,
            fact(4, Some("10-K"), Some("2022-11-01"), Some("e")),
        ]);
        assert_eq!(ranks(&ranked), vec![2, 1, 1, 1, 3]);
        assert_eq!(ranked.iter().filter(|r| r.is_preferred).count(), 3);
    }

    #[test]
    fn ranking_is_independent_of_input_order() {
        let input = vec![
            fact(0, Some("10-K"), Some("2023-11-03"), Some("x")),
            fact(1, Some("10-K"), Some("2023-11-03"), Some("x")),
            fact(2, Some("10-Q"), Some("2023-11-03"), Some("y")),
            fact(3, None, None, None),
        ];
        let forward = rank_facts(input.clone());
        let mut reversed = rank_facts(input.into_iter().rev().collect());
        reversed.reverse();
        assert_eq!(forward, reversed);
        assert_eq!(ranks(&forward), vec![1, 2, 3, 4]);
    }
}
