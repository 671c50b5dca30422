//! Job record storage: the single source of truth for job state.

mod store;

#[cfg(feature = "postgres")]
mod postgres;

pub use store::{InMemoryJobStore, JobStore, JobStoreError};

#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;
