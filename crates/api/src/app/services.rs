//! Service layer between the HTTP handlers and the pipeline infrastructure,
//! plus the in-memory vs persistent wiring selected at startup.

use std::sync::Arc;

use tracing::warn;

use bloodwork_analysis::PanelAnalyzer;
use bloodwork_core::{Job, JobId, PipelineError, TaskId, TaskState};
use bloodwork_crypto::PayloadCodec;
use bloodwork_extract::{ExtractError, PlainTextExtractor, TextExtractor};
use bloodwork_infra::broker::{Broker, InMemoryBroker, TaskPayload};
use bloodwork_infra::config::PipelineConfig;
use bloodwork_infra::memory::InMemoryMemorySink;
use bloodwork_infra::records::{InMemoryJobStore, JobStore};
use bloodwork_infra::worker::{AnalysisExecutor, run_worker};

#[cfg(feature = "persistent")]
use bloodwork_infra::{broker::RedisBroker, records::PostgresJobStore};
#[cfg(feature = "persistent")]
use sqlx::PgPool;

use crate::app::errors::ApiError;

/// Query used when the form omits one.
pub const DEFAULT_QUERY: &str = "Summarize my blood test report";

/// Accepted upload receipt returned by the submission service.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub filename: String,
    pub query: String,
}

/// A job record joined with its resolved execution state.
#[derive(Debug, Clone)]
pub struct JobStatusView {
    pub job: Job,
    /// Normalized state label: pending, running, succeeded or failed.
    pub state: &'static str,
}

/// Decrypted upload returned by the retrieval service.
#[derive(Debug)]
pub struct OriginalDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Ingress half of the pipeline: validate, encrypt, enqueue, record.
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    codec: PayloadCodec,
    extractor: Arc<dyn TextExtractor>,
}

impl SubmissionService {
    /// Accept an upload or reject it before anything is persisted.
    ///
    /// Order matters: encrypt first, then enqueue, then create the record.
    /// A crash between the last two leaves a queued task whose record the
    /// worker will briefly fail to find; redelivery covers that window.
    pub async fn submit(
        &self,
        filename: &str,
        bytes: &[u8],
        query: Option<String>,
    ) -> Result<SubmissionReceipt, ApiError> {
        if !filename.to_lowercase().ends_with(".pdf") {
            return Err(ApiError::Validation(PipelineError::unsupported_format(
                format!("expected a .pdf upload, got {filename:?}"),
            )));
        }

        // Fast extraction pass: rejects uploads with no recoverable text
        // before they cost a queue slot. The worker extracts again.
        if let Err(e) = self.extractor.extract(bytes) {
            let err = match &e {
                ExtractError::NoText(_) => PipelineError::empty_document(e.to_string()),
                ExtractError::Malformed(_) => PipelineError::unsupported_format(e.to_string()),
            };
            return Err(ApiError::Validation(err));
        }

        let query = match query.filter(|q| !q.trim().is_empty()) {
            Some(q) => q,
            None => DEFAULT_QUERY.to_string(),
        };

        let token = self
            .codec
            .encrypt(bytes)
            .map_err(|e| ApiError::Crypto(e.to_string()))?;

        let job_id = JobId::new();
        let task_id = self
            .broker
            .enqueue(TaskPayload {
                job_id,
                token: token.clone(),
                query: query.clone(),
            })
            .await
            .map_err(|e| ApiError::Broker(e.to_string()))?;

        self.store
            .create(Job::new(job_id, task_id, filename, query.clone(), token))
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        Ok(SubmissionReceipt {
            job_id,
            task_id,
            filename: filename.to_string(),
            query,
        })
    }
}

/// Read side of the pipeline: job status and results.
pub struct StatusService {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
}

impl StatusService {
    /// Resolve a job through its durable record first; the broker only
    /// refines a still-pending record into "running". A broker restart thus
    /// degrades the answer to "pending" instead of losing the job.
    pub async fn report(&self, job_id: JobId) -> Result<JobStatusView, ApiError> {
        let job = self
            .store
            .get(job_id)
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?
            .ok_or(ApiError::NotFound)?;

        // The boundary vocabulary is the broker-style four-value enum; the
        // record's persisted `completed` maps to `succeeded` here.
        let state = match &job.status {
            bloodwork_core::JobStatus::Completed => "succeeded",
            bloodwork_core::JobStatus::Failed { .. } => "failed",
            bloodwork_core::JobStatus::Pending => {
                match self.broker.task_state(job.task_id).await {
                    Ok(Some(TaskState::Running)) => "running",
                    Ok(_) => "pending",
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "broker state lookup failed");
                        "pending"
                    }
                }
            }
        };

        Ok(JobStatusView { job, state })
    }
}

/// On-demand decryption of a stored upload.
pub struct RetrievalService {
    store: Arc<dyn JobStore>,
    codec: PayloadCodec,
}

impl RetrievalService {
    pub async fn original(&self, job_id: JobId) -> Result<OriginalDocument, ApiError> {
        let job = self
            .store
            .get(job_id)
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?
            .ok_or(ApiError::NotFound)?;

        let bytes = self
            .codec
            .decrypt(&job.encrypted_payload)
            .map_err(|e| ApiError::Crypto(e.to_string()))?;

        Ok(OriginalDocument {
            filename: job.filename,
            bytes,
        })
    }
}

pub struct AppServices {
    pub submission: SubmissionService,
    pub status: StatusService,
    pub retrieval: RetrievalService,
}

impl AppServices {
    fn new(store: Arc<dyn JobStore>, broker: Arc<dyn Broker>, codec: PayloadCodec) -> Self {
        Self {
            submission: SubmissionService {
                store: store.clone(),
                broker: broker.clone(),
                codec: codec.clone(),
                extractor: Arc::new(PlainTextExtractor),
            },
            status: StatusService {
                store: store.clone(),
                broker,
            },
            retrieval: RetrievalService { store, codec },
        }
    }
}

/// Wire up the services, selecting the backing infrastructure from the
/// environment the way the deployment scripts expect.
pub async fn build_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "persistent")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "persistent"))]
        warn!(
            "USE_PERSISTENT_STORES=true but the persistent feature is not enabled; \
             falling back to in-memory infra"
        );
    }

    build_in_memory_services(config)
}

/// Dev/test wiring: in-memory store and broker plus an in-process worker
/// task, so the single binary serves the whole pipeline.
fn build_in_memory_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let codec = match &config.encryption_key {
        Some(key) => PayloadCodec::from_base64_key(key)?,
        None => {
            warn!("ENCRYPTION_KEY not set; using an ephemeral dev key");
            PayloadCodec::new(PayloadCodec::generate_key())
        }
    };

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());

    let executor = Arc::new(
        AnalysisExecutor::new(
            store.clone(),
            broker.clone(),
            codec.clone(),
            Arc::new(PlainTextExtractor),
            Arc::new(PanelAnalyzer),
            Arc::new(InMemoryMemorySink::new()),
        )
        .with_retry_policy(config.retry_policy())
        .with_soft_time_limit(config.soft_time_limit),
    );
    tokio::spawn(run_worker(
        executor,
        broker.clone(),
        format!("api-embedded-{}", uuid::Uuid::now_v7()),
        config.hard_time_limit,
    ));

    Ok(AppServices::new(store, broker, codec))
}

/// Production wiring: Postgres records and a Redis Streams broker. The
/// worker runs as its own process; this only serves HTTP.
#[cfg(feature = "persistent")]
async fn build_persistent_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    use anyhow::Context;

    let codec = PayloadCodec::from_base64_key(config.require_encryption_key()?)?;

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
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

    Ok(AppServices::new(store, broker, codec))
}
