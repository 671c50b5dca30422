//! Long-lived semantic index for extracted report text.
//!
//! Best-effort side channel: the executor writes every successfully
//! extracted document here for later retrieval/context reuse, and a failed
//! write never aborts the job.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("memory sink failed: {0}")]
pub struct MemoryError(pub String);

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub text: String,
    /// Document provenance (source, query, job id).
    pub metadata: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

pub trait MemorySink: Send + Sync {
    fn add(&self, text: &str, metadata: JsonValue) -> Result<(), MemoryError>;
}

/// In-memory sink for dev/tests.
#[derive(Debug, Default)]
pub struct InMemoryMemorySink {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<MemoryEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl MemorySink for InMemoryMemorySink {
    fn add(&self, text: &str, metadata: JsonValue) -> Result<(), MemoryError> {
        self.entries.lock().unwrap().push(MemoryEntry {
            text: text.to_string(),
            metadata,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}
