//! Reading simulator output and writing result files.

pub mod output;
pub mod run_file;

pub use run_file::{FlatHistogramFile, ResourceSummary, RunFile, RunHeader};
