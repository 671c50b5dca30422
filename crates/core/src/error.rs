//! Pipeline error model.

use thiserror::Error;

/// Result type used across the pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Classification consulted by the retry wrapper.
///
/// Transient failures are retried up to the configured cap; permanent
/// failures go terminal on the first attempt (same ciphertext, same key,
/// same outcome).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Error taxonomy of the job pipeline.
///
/// Validation variants fail fast at the submission boundary and are never
/// enqueued; the remaining variants are raised inside worker processing and
/// branch the retry wrapper on their [`ErrorClass`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The uploaded filename does not carry the expected document extension.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The fast extraction pass yielded only whitespace.
    #[error("empty document: {0}")]
    EmptyDocument(String),

    /// Encrypting the uploaded payload failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The stored ciphertext is corrupt or the key has changed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Text extraction failed (transient document-parsing issue).
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Any failure inside the analysis capability.
    #[error("analysis failed: {0}")]
    Analysis(String),

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested record was not found.
    #[error("not found")]
    NotFound,
}

impl PipelineError {
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn empty_document(msg: impl Into<String>) -> Self {
        Self::EmptyDocument(msg.into())
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Encryption(msg.into())
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Decryption(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Retry class of this error.
    ///
    /// `NotFound` is transient inside the worker: the record write can trail
    /// the enqueue, so redelivery gets another chance to observe it.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Extraction(_) | Self::Analysis(_) | Self::NotFound => ErrorClass::Transient,
            Self::UnsupportedFormat(_)
            | Self::EmptyDocument(_)
            | Self::Encryption(_)
            | Self::Decryption(_)
            | Self::InvalidId(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_is_permanent() {
        assert_eq!(
            PipelineError::decryption("tag mismatch").class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn extraction_and_analysis_are_transient() {
        assert!(PipelineError::extraction("parser hiccup").is_transient());
        assert!(PipelineError::analysis("model unavailable").is_transient());
    }
}
