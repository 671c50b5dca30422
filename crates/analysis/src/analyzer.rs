use thiserror::Error;

use crate::report::AnalysisReport;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid analysis input: {0}")]
    InvalidInput(String),

    #[error("analysis failed: {0}")]
    Failed(String),
}

/// The external reasoning engine, injected into the worker at construction.
///
/// Implementations may take seconds to minutes; callers run them off the
/// async runtime. Must not mutate pipeline state.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str, query: &str) -> Result<AnalysisReport, AnalysisError>;
}
