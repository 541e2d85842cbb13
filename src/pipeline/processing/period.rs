use crate::common::types::PeriodKind;
use chrono::NaiveDate;

/// Classify a datapoint's temporal semantics and derive its period id.
///
/// A start date makes the fact a duration. The id prefers the fiscal
/// `{fy}-{fp}` pair, then `{end}` for instants, then `{start}:{end}`.
/// The calendar frame tag never takes part.
pub fn classify(
    start: Option<NaiveDate>,
    end: NaiveDate,
    fiscal_year: Option<i32>,
    fiscal_period: Option<&str>,
) -> (PeriodKind, String) {
    let kind = if start.is_some() {
        PeriodKind::Duration
    } else {
        PeriodKind::Instant
    };

    let id = match (fiscal_year, fiscal_period) {
        (Some(fy), Some(fp)) => format!("{}-{}", fy, fp),
        _ => match start {
            Some(start) => format!("{}:{}", start, end),
            None => end.to_string(),
        },
    };

    (kind, id)
}
