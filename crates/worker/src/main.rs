//! Standalone analysis worker: consumes the Redis Streams queue and writes
//! results to the Postgres record store.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use bloodwork_analysis::PanelAnalyzer;
use bloodwork_crypto::PayloadCodec;
use bloodwork_extract::PlainTextExtractor;
use bloodwork_infra::broker::{Broker, RedisBroker};
use bloodwork_infra::config::PipelineConfig;
use bloodwork_infra::memory::InMemoryMemorySink;
use bloodwork_infra::records::{JobStore, PostgresJobStore};
use bloodwork_infra::worker::{AnalysisExecutor, run_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bloodwork_observability::init();

    let config = PipelineConfig::from_env()?;
    let codec = PayloadCodec::from_base64_key(config.require_encryption_key()?)?;

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for the worker")?;
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let postgres = PostgresJobStore::new(pool);
    postgres.migrate().await?;
    let store: Arc<dyn JobStore> = Arc::new(postgres);

    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::connect(&config.redis_url, config.result_retention)
            .await
            .context("failed to connect to Redis")?,
    );

    let executor = Arc::new(
        AnalysisExecutor::new(
            store,
            broker.clone(),
            codec,
            Arc::new(PlainTextExtractor),
            Arc::new(PanelAnalyzer),
            Arc::new(InMemoryMemorySink::new()),
        )
        .with_retry_policy(config.retry_policy())
        .with_soft_time_limit(config.soft_time_limit),
    );

    let consumer = format!("worker-{}", uuid::Uuid::now_v7());
    tracing::info!(consumer = %consumer, "starting analysis worker");
    run_worker(executor, broker, consumer, config.hard_time_limit).await;
    Ok(())
}
