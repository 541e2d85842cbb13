pub mod common;
pub mod config;
pub mod observability;
pub mod pipeline;

pub use common::{DocumentError, NormalizerError, RepairError, Result};
pub use config::RunConfig;
pub use pipeline::{run_pipeline, CancellationToken, RunSummary};
