//! Environment-sourced configuration, fixed at process start. No hot reload.

use std::env;
use std::time::Duration;

use anyhow::{Context, bail};

use crate::worker::RetryPolicy;

/// Configuration shared by the API and worker processes.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Broker connection address.
    pub redis_url: String,
    /// Relational record store; optional when running with in-memory infra.
    pub database_url: Option<String>,
    /// URL-safe base64, must decode to exactly 256 bits. Shared read-only by
    /// both processes; rotation requires redeploying all participants.
    pub encryption_key: Option<String>,
    /// Bounds the analysis step; on expiry the attempt fails as Transient
    /// and goes through the normal retry path.
    pub soft_time_limit: Duration,
    /// Crossing this aborts the attempt; the message is redelivered.
    pub hard_time_limit: Duration,
    /// How long broker-side task state is retained after it is written.
    pub result_retention: Duration,
    /// Retries after the first attempt (2 retries = 3 total attempts).
    pub max_retries: u32,
    /// Fixed delay before each retry.
    pub retry_delay: Duration,
    /// Bind address of the HTTP API.
    pub bind_addr: String,
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/0".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            encryption_key: env::var("ENCRYPTION_KEY").ok(),
            soft_time_limit: duration_secs("TASK_SOFT_TIME_LIMIT", 600)?,
            hard_time_limit: duration_secs("TASK_TIME_LIMIT", 7200)?,
            result_retention: duration_secs("RESULT_EXPIRES", 9000)?,
            max_retries: parse_env("TASK_MAX_RETRIES", 2)?,
            retry_delay: duration_secs("TASK_RETRY_DELAY", 60)?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, self.retry_delay)
    }

    /// The key is optional for the dev API (which generates one) but
    /// mandatory for any process that must interoperate across the broker.
    pub fn require_encryption_key(&self) -> anyhow::Result<&str> {
        match &self.encryption_key {
            Some(key) => Ok(key),
            None => bail!("ENCRYPTION_KEY must be set"),
        }
    }
}

fn duration_secs(name: &str, default: u64) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(parse_env(name, default)?))
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(default),
    }
}
