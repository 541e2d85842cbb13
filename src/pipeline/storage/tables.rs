//! Columnar table writers.
//!
//! Each table is one Arrow record batch written to a snappy-compressed
//! Parquet file. Dates are stored as ISO `YYYY-MM-DD` strings and entity ids
//! as zero-padded strings, so the files read the same from any engine.

use crate::common::error::Result;
use crate::common::types::{ConceptRow, EntityRow, FilingRow, RankedFact, SentenceRow};
use crate::observability::metrics;
use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

fn write_parquet(path: &Path, table: &'static str, batch: RecordBatch) -> Result<usize> {
    let rows = batch.num_rows();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    if rows > 0 {
        writer.write(&batch)?;
    }
    writer.close()?;

    debug!("Wrote {} rows to {}", rows, path.display());
    metrics::writer::table_written(table, rows);
    Ok(rows)
}

fn utf8(name: &str, nullable: bool) -> Field {
    Field::new(name, DataType::Utf8, nullable)
}

fn date_strings<I: IntoIterator<Item = NaiveDate>>(dates: I) -> ArrayRef {
    Arc::new(StringArray::from(
        dates.into_iter().map(|d| d.to_string()).collect::<Vec<_>>(),
    ))
}

fn optional_date_strings<I: IntoIterator<Item = Option<NaiveDate>>>(dates: I) -> ArrayRef {
    Arc::new(StringArray::from(
        dates
            .into_iter()
            .map(|d| d.map(|d| d.to_string()))
            .collect::<Vec<_>>(),
    ))
}

fn strings<'a, I: IntoIterator<Item = &'a str>>(values: I) -> ArrayRef {
    Arc::new(StringArray::from(values.into_iter().collect::<Vec<_>>()))
}

fn optional_strings<'a, I: IntoIterator<Item = Option<&'a str>>>(values: I) -> ArrayRef {
    Arc::new(StringArray::from(values.into_iter().collect::<Vec<_>>()))
}

pub fn entity_schema() -> Schema {
    Schema::new(vec![
        utf8("cik", false),
        utf8("entity_name", false),
        utf8("last_seen_filing_date", true),
        utf8("snapshot_date", false),
        Field::new("partial", DataType::Boolean, false),
    ])
}

pub fn write_entities(path: &Path, rows: &[EntityRow]) -> Result<usize> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.cik.to_string()).collect::<Vec<_>>(),
        )),
        strings(rows.iter().map(|r| r.entity_name.as_str())),
        optional_date_strings(rows.iter().map(|r| r.last_seen_filing_date)),
        date_strings(rows.iter().map(|r| r.snapshot_date)),
        Arc::new(BooleanArray::from(rows.iter().map(|r| r.partial).collect::<Vec<_>>())),
    ];
    let batch = RecordBatch::try_new(Arc::new(entity_schema()), columns)?;
    write_parquet(path, "entities", batch)
}

pub fn concept_schema() -> Schema {
    Schema::new(vec![
        utf8("taxonomy", false),
        utf8("concept", false),
        utf8("label", false),
        utf8("description", false),
    ])
}

pub fn write_concepts(path: &Path, rows: &[ConceptRow]) -> Result<usize> {
    let columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|r| r.taxonomy.as_str())),
        strings(rows.iter().map(|r| r.concept.as_str())),
        strings(rows.iter().map(|r| r.label.as_str())),
        strings(rows.iter().map(|r| r.description.as_str())),
    ];
    let batch = RecordBatch::try_new(Arc::new(concept_schema()), columns)?;
    write_parquet(path, "concepts", batch)
}

pub fn fact_schema() -> Schema {
    Schema::new(vec![
        utf8("cik", false),
        utf8("taxonomy", false),
        utf8("concept", false),
        utf8("unit", false),
        Field::new("value", DataType::Float64, false),
        utf8("start_date", true),
        utf8("end_date", false),
        Field::new("fy", DataType::Int32, true),
        utf8("fp", true),
        utf8("form", true),
        utf8("filed_date", true),
        utf8("accession_number", true),
        utf8("frame", true),
        utf8("period_type", false),
        utf8("period_key", false),
        Field::new("revision_rank", DataType::Int32, false),
        Field::new("is_preferred", DataType::Boolean, false),
    ])
}

pub fn write_facts(path: &Path, rows: &[RankedFact]) -> Result<usize> {
    let facts = || rows.iter().map(|r| &r.fact);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            facts().map(|f| f.cik.to_string()).collect::<Vec<_>>(),
        )),
        strings(facts().map(|f| f.taxonomy.as_str())),
        strings(facts().map(|f| f.concept.as_str())),
        strings(facts().map(|f| f.unit.as_str())),
        Arc::new(Float64Array::from(facts().map(|f| f.value).collect::<Vec<_>>())),
        optional_date_strings(facts().map(|f| f.start_date)),
        date_strings(facts().map(|f| f.end_date)),
        Arc::new(Int32Array::from(facts().map(|f| f.fiscal_year).collect::<Vec<_>>())),
        optional_strings(facts().map(|f| f.fiscal_period.as_deref())),
        optional_strings(facts().map(|f| f.form.as_deref())),
        optional_date_strings(facts().map(|f| f.filed_date)),
        optional_strings(facts().map(|f| f.accession.as_deref())),
        optional_strings(facts().map(|f| f.frame.as_deref())),
        strings(facts().map(|f| f.period_kind.as_str())),
        strings(facts().map(|f| f.period_id.as_str())),
        Arc::new(Int32Array::from(
            rows.iter()
                .map(|r| i32::try_from(r.revision_rank).unwrap_or(i32::MAX))
                .collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(rows.iter().map(|r| r.is_preferred).collect::<Vec<_>>())),
    ];
    let batch = RecordBatch::try_new(Arc::new(fact_schema()), columns)?;
    write_parquet(path, "facts", batch)
}

pub fn filing_schema() -> Schema {
    Schema::new(vec![
        utf8("cik", false),
        utf8("accession_number", false),
        utf8("form", true),
        utf8("filed_date", true),
    ])
}

pub fn write_filings(path: &Path, rows: &[FilingRow]) -> Result<usize> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.cik.to_string()).collect::<Vec<_>>(),
        )),
        strings(rows.iter().map(|r| r.accession.as_str())),
        optional_strings(rows.iter().map(|r| r.form.as_deref())),
        optional_date_strings(rows.iter().map(|r| r.filed_date)),
    ];
    let batch = RecordBatch::try_new(Arc::new(filing_schema()), columns)?;
    write_parquet(path, "filings", batch)
}

pub fn sentence_schema() -> Schema {
    Schema::new(vec![
        utf8("cik", false),
        utf8("entity_name", false),
        utf8("taxonomy", false),
        utf8("concept", false),
        utf8("label", false),
        utf8("unit", false),
        Field::new("value", DataType::Float64, false),
        utf8("end_date", false),
        utf8("start_date", true),
        utf8("period_type", false),
        utf8("period_key", false),
        Field::new("fy", DataType::Int32, true),
        utf8("fp", true),
        utf8("form", true),
        utf8("filed_date", true),
        utf8("accession_number", true),
        utf8("sentence", false),
    ])
}

pub fn write_sentences(path: &Path, rows: &[SentenceRow]) -> Result<usize> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.cik.to_string()).collect::<Vec<_>>(),
        )),
        strings(rows.iter().map(|r| r.entity_name.as_str())),
        strings(rows.iter().map(|r| r.taxonomy.as_str())),
        strings(rows.iter().map(|r| r.concept.as_str())),
        strings(rows.iter().map(|r| r.label.as_str())),
        strings(rows.iter().map(|r| r.unit.as_str())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.value).collect::<Vec<_>>())),
        date_strings(rows.iter().map(|r| r.end_date)),
        optional_date_strings(rows.iter().map(|r| r.start_date)),
        strings(rows.iter().map(|r| r.period_kind.as_str())),
        strings(rows.iter().map(|r| r.period_id.as_str())),
        Arc::new(Int32Array::from(rows.iter().map(|r| r.fiscal_year).collect::<Vec<_>>())),
        optional_strings(rows.iter().map(|r| r.fiscal_period.as_deref())),
        optional_strings(rows.iter().map(|r| r.form.as_deref())),
        optional_date_strings(rows.iter().map(|r| r.filed_date)),
        optional_strings(rows.iter().map(|r| r.accession.as_deref())),
        strings(rows.iter().map(|r| r.sentence.as_str())),
    ];
    let batch = RecordBatch::try_new(Arc::new(sentence_schema()), columns)?;
    write_parquet(path, "sentences", batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Cik, FlatFact, PeriodKind, SourceSeq};
    use arrow_array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn read_back(path: &Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn fact_table_round_trips_nulls_and_ranks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("facts.parquet");
        let fact = FlatFact {
            cik: Cik(320193),
            taxonomy: "us-gaap".to_string(),
            concept: "Assets".to_string(),
            unit: "USD".to_string(),
            value: 352583000000.0,
            start_date: None,
            end_date: date("2023-09-30"),
            fiscal_year: None,
            fiscal_period: None,
            form: Some("10-K".to_string()),
            filed_date: Some(date("2023-11-03")),
            accession: None,
            frame: None,
            period_kind: PeriodKind::Instant,
            period_id: "2023-09-30".to_string(),
            source_seq: SourceSeq { document: 0, ordinal: 0 },
        };
        let rows = vec![
            RankedFact { fact: fact.clone(), revision_rank: 1, is_preferred: true },
            RankedFact { fact, revision_rank: 2, is_preferred: false },
        ];

        assert_eq!(write_facts(&path, &rows).unwrap(), 2);
        let batches = read_back(&path);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().fields().len(), fact_schema().fields().len());

        let cik = batch
            .column_by_name("cik")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(cik.value(0), "0000320193");

        let start = batch.column_by_name("start_date").unwrap();
        assert!(start.is_null(0));

        let ranks = batch
            .column_by_name("revision_rank")
            .unwrap()
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(ranks.values().to_vec(), vec![1, 2]);
    }

    #[test]
    fn empty_tables_still_carry_their_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filings.parquet");
        assert_eq!(write_filings(&path, &[]).unwrap(), 0);

        let file = File::open(&path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        let names: Vec<_> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["cik", "accession_number", "form", "filed_date"]);
    }
}
