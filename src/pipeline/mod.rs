// Normalization pipeline: ingestion, processing, storage and the run orchestrator

pub mod cancel;
pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod storage;

pub use cancel::CancellationToken;
pub use orchestrator::{run_pipeline, RunSummary};
