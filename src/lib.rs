//! Catalog ingestion pipeline: load a remote product catalog into SQLite,
//! cache each product image and annotate it with a vision model.

pub mod database;
pub mod error;
pub mod ingest;
pub mod ml;
pub mod pipeline;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, RunSummary, StagePlan, StageReport};
