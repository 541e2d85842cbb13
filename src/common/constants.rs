/// Constants shared across the normalization pipeline.
/// Keep table names, thresholds and the Tier-1 allow-list here so every stage
/// agrees on them.

// Documents smaller than this are known-empty acquisitions and are skipped.
pub const MIN_DOCUMENT_BYTES: u64 = 100;

// Source documents are named CIK##########.json
pub const DOCUMENT_PREFIX: &str = "CIK";
pub const DOCUMENT_EXTENSION: &str = "json";

// Width of the zero-padded entity identifier
pub const CIK_WIDTH: usize = 10;

// Required top-level keys of a company-facts document
pub const KEY_CIK: &str = "cik";
pub const KEY_ENTITY_NAME: &str = "entityName";
pub const KEY_FACTS: &str = "facts";

// Output layout
pub const SEC_DIR: &str = "sec";
pub const RAG_DIR: &str = "rag";
pub const ENTITY_TABLE_FILE: &str = "entity_master.parquet";
pub const CONCEPT_TABLE_FILE: &str = "concepts.parquet";
pub const FACT_TABLE_FILE: &str = "facts.parquet";
pub const FILING_TABLE_FILE: &str = "filings.parquet";
pub const SENTENCE_TABLE_FILE: &str = "sec_facts_index.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const DOCUMENT_LOG_FILE: &str = "documents.ndjson";
pub const METRICS_FILE: &str = "metrics.prom";

/// Every file a run owns, as (subdirectory, file name). Anything else under
/// the output directory belongs to someone else and is left alone.
pub const OUTPUT_FILES: &[(&str, &str)] = &[
    (SEC_DIR, ENTITY_TABLE_FILE),
    (SEC_DIR, CONCEPT_TABLE_FILE),
    (SEC_DIR, FACT_TABLE_FILE),
    (SEC_DIR, FILING_TABLE_FILE),
    (SEC_DIR, MANIFEST_FILE),
    (SEC_DIR, DOCUMENT_LOG_FILE),
    (SEC_DIR, METRICS_FILE),
    (RAG_DIR, SENTENCE_TABLE_FILE),
];

pub const DEFAULT_DOCUMENT_TIMEOUT_SECS: u64 = 120;

/// Form types in preference order; earlier entries win revision ties.
pub const FORM_PRIORITY: &[&str] = &[
    "10-K", "10-K/A", "20-F", "20-F/A", "10-Q", "10-Q/A", "8-K", "8-K/A",
];

/// Rank assigned to unrecognized or missing form types
pub const UNKNOWN_FORM_PRIORITY: usize = 99;

/// Core financial concepts rendered into the retrieval sentence index
pub const TIER1_CONCEPTS: &[&str] = &[
    // DEI
    "EntityCommonStockSharesOutstanding",
    "EntityPublicFloat",
    // Balance sheet
    "Assets",
    "AssetsCurrent",
    "Liabilities",
    "LiabilitiesCurrent",
    "LiabilitiesAndStockholdersEquity",
    "StockholdersEquity",
    "RetainedEarningsAccumulatedDeficit",
    "CashAndCashEquivalentsAtCarryingValue",
    "PropertyPlantAndEquipmentNet",
    // Income statement
    "Revenues",
    "RevenueFromContractWithCustomerExcludingAssessedTax",
    "CostOfRevenue",
    "CostOfGoodsAndServicesSold",
    "GrossProfit",
    "OperatingIncomeLoss",
    "NetIncomeLoss",
    "IncomeTaxExpenseBenefit",
    "EarningsPerShareBasic",
    "EarningsPerShareDiluted",
    // Cash flow
    "NetCashProvidedByUsedInOperatingActivities",
    "NetCashProvidedByUsedInInvestingActivities",
    "NetCashProvidedByUsedInFinancingActivities",
    // Shares
    "WeightedAverageNumberOfSharesOutstandingBasic",
    "WeightedAverageNumberOfSharesOutstandingDiluted",
    "CommonStockSharesOutstanding",
];

/// Preference position of a form type (lower is better)
pub fn form_priority(form: Option<&str>) -> usize {
    form.and_then(|f| FORM_PRIORITY.iter().position(|known| *known == f))
        .unwrap_or(UNKNOWN_FORM_PRIORITY)
}

/// Whether a concept name belongs to the Tier-1 allow-list
pub fn is_tier1(concept: &str) -> bool {
    TIER1_CONCEPTS.contains(&concept)
}
