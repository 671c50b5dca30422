//! `bloodwork-extract` — content-extraction collaborator boundary.
//!
//! The pipeline treats extraction as an external capability: it only depends
//! on the [`TextExtractor`] trait. The built-in [`PlainTextExtractor`] handles
//! text-bearing documents (UTF-8 decode plus the whitespace cleanup pass the
//! analysis expects); heavier parsers plug in behind the same trait.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The document yields no recoverable text.
    #[error("no recoverable text: {0}")]
    NoText(String),

    /// The document could not be parsed at all.
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Turns raw document bytes into analyzable text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Extractor for text-bearing report documents.
///
/// Decodes UTF-8, drops blank lines and trims the result, mirroring the
/// cleanup expected by the analysis capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let raw = std::str::from_utf8(bytes)
            .map_err(|e| ExtractError::Malformed(format!("not valid UTF-8: {e}")))?;

        let mut text = String::with_capacity(raw.len());
        for line in raw.lines() {
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            text.push_str(line);
            text.push('\n');
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ExtractError::NoText(
                "document contains only whitespace".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_normalizes_text() {
        let doc = b"Hemoglobin 9.2\n\n\nReference Range 13-17 g/dL   \n";
        let text = PlainTextExtractor.extract(doc).unwrap();
        assert_eq!(text, "Hemoglobin 9.2\nReference Range 13-17 g/dL");
    }

    #[test]
    fn whitespace_only_document_has_no_text() {
        let err = PlainTextExtractor.extract(b"  \n\t\n  ").unwrap_err();
        assert!(matches!(err, ExtractError::NoText(_)));
    }

    #[test]
    fn binary_garbage_is_malformed() {
        let err = PlainTextExtractor.extract(&[0xFF, 0xFE, 0x00, 0x80]).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[test]
    fn empty_input_has_no_text() {
        assert!(matches!(
            PlainTextExtractor.extract(b""),
            Err(ExtractError::NoText(_))
        ));
    }
}
