//! `bloodwork-analysis`
//!
//! **Responsibility:** the analysis capability boundary.
//!
//! The pipeline treats the reasoning engine as an opaque collaborator behind
//! the [`Analyzer`] trait: extracted text and a query go in, a structured
//! [`AnalysisReport`] comes out. This crate must not depend on storage,
//! brokers, or HTTP; concrete engines are injected where the worker is
//! constructed, which is also what makes test doubles trivial.

pub mod analyzer;
pub mod panel;
pub mod report;

pub use analyzer::{AnalysisError, Analyzer};
pub use panel::PanelAnalyzer;
pub use report::AnalysisReport;
