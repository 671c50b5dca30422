//! `bloodwork-infra` — infrastructure for the encrypted job pipeline.
//!
//! Record store, broker client, worker executor, vector-memory side channel,
//! and environment configuration. In-memory implementations back dev and
//! tests; Redis Streams and Postgres implementations sit behind the `redis`
//! and `postgres` cargo features.

pub mod broker;
pub mod config;
pub mod memory;
pub mod records;
pub mod worker;
