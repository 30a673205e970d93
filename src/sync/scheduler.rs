//! Periodic order import
//!
//! The scheduler runs one task per marketplace. Each task imports once at
//! startup, then on its configured interval with random jitter, until the
//! shutdown signal fires. Imports can also be triggered on demand through a
//! [`ManualImportHandle`].

use crate::config::SchedulerConfig;
use crate::error::SyncError;
use crate::models::ImportResult;
use crate::sync::synchronizer::MarketplaceSynchronizer;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Errors returned to manual import callers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    /// No job is registered under that name
    #[error("Unknown marketplace: {0}")]
    UnknownJob(String),

    /// The scheduler loop is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// The import failed or timed out
    #[error("Import failed: {0}")]
    Failed(String),
}

/// Last known state of one job
#[derive(Debug, Clone, Default)]
pub struct JobStatus {
    /// When the last run finished
    pub last_run: Option<std::time::SystemTime>,
    /// Outcome of the last run
    pub last_result: Option<Result<ImportResult, String>>,
    /// Estimated next run
    pub next_run: Option<std::time::SystemTime>,
    /// Whether a run is in progress
    pub in_progress: bool,
}

/// Something the scheduler can run periodically
#[async_trait]
pub trait ImportJob: Send + Sync {
    /// Name of the job, used for status and manual triggers
    fn name(&self) -> &str;

    /// Interval between runs
    fn interval(&self) -> Duration;

    /// Run one import pass
    async fn run(&self) -> Result<ImportResult, SyncError>;
}

#[async_trait]
impl ImportJob for MarketplaceSynchronizer {
    fn name(&self) -> &str {
        self.marketplace()
    }

    fn interval(&self) -> Duration {
        self.order_import_interval()
    }

    async fn run(&self) -> Result<ImportResult, SyncError> {
        self.import_orders(None).await
    }
}

struct ManualImportRequest {
    job_name: String,
    response: oneshot::Sender<Result<ImportResult, SchedulerError>>,
}

type StatusMap = Arc<RwLock<HashMap<String, JobStatus>>>;

/// Scheduler for periodic order imports
pub struct SyncScheduler {
    config: SchedulerConfig,
    jobs: Vec<Arc<dyn ImportJob>>,
    status: StatusMap,
    shutdown_rx: broadcast::Receiver<()>,
    manual_rx: mpsc::Receiver<ManualImportRequest>,
    manual_tx: mpsc::Sender<ManualImportRequest>,
}

impl SyncScheduler {
    /// Create a scheduler for the given jobs
    pub fn new(
        config: SchedulerConfig,
        jobs: Vec<Arc<dyn ImportJob>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (manual_tx, manual_rx) = mpsc::channel(32);

        let status = jobs
            .iter()
            .map(|j| (j.name().to_string(), JobStatus::default()))
            .collect();

        Self {
            config,
            jobs,
            status: Arc::new(RwLock::new(status)),
            shutdown_rx,
            manual_rx,
            manual_tx,
        }
    }

    /// Handle for triggering imports and reading job status while running
    pub fn manual_handle(&self) -> ManualImportHandle {
        ManualImportHandle {
            tx: self.manual_tx.clone(),
            status: self.status.clone(),
        }
    }

    /// Run until the shutdown signal fires
    pub async fn run(mut self) {
        info!(jobs = self.jobs.len(), "Starting import scheduler");

        if self.config.initial_delay_secs > 0 {
            debug!(
                delay_secs = self.config.initial_delay_secs,
                "Waiting for initial delay"
            );
            tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)).await;
        }

        let mut handles = Vec::new();
        let (task_shutdown_tx, _) = broadcast::channel::<()>(1);

        for job in &self.jobs {
            let job = job.clone();
            let status = self.status.clone();
            let config = self.config.clone();
            let task_shutdown_rx = task_shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                Self::run_job(job, status, config, task_shutdown_rx).await;
            }));
        }

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping import scheduler");
                    let _ = task_shutdown_tx.send(());
                    break;
                }
                Some(request) = self.manual_rx.recv() => {
                    self.handle_manual(request).await;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("Import scheduler stopped");
    }

    fn jitter(config: &SchedulerConfig) -> u64 {
        if config.jitter_secs > 0 {
            rand::thread_rng().gen_range(0..config.jitter_secs)
        } else {
            0
        }
    }

    async fn run_job(
        job: Arc<dyn ImportJob>,
        status: StatusMap,
        config: SchedulerConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let name = job.name().to_string();
        let interval = job.interval();

        info!(job = name, "Performing initial import");
        let _ = Self::perform(&job, &status, &config).await;

        let jitter = Self::jitter(&config);
        let next_run = Instant::now() + interval + Duration::from_secs(jitter);
        debug!(
            job = name,
            interval_secs = interval.as_secs(),
            jitter_secs = jitter,
            "Scheduled next import"
        );

        let mut timer = interval_at(next_run, interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(job = name, "Import task shutting down");
                    break;
                }
                _ = timer.tick() => {
                    let jitter = Self::jitter(&config);
                    if jitter > 0 {
                        tokio::time::sleep(Duration::from_secs(jitter)).await;
                    }

                    info!(job = name, "Performing scheduled import");
                    let _ = Self::perform(&job, &status, &config).await;
                }
            }
        }
    }

    async fn perform(
        job: &Arc<dyn ImportJob>,
        status: &StatusMap,
        config: &SchedulerConfig,
    ) -> Result<ImportResult, SchedulerError> {
        let name = job.name().to_string();

        {
            let mut map = status.write().await;
            if let Some(s) = map.get_mut(&name) {
                s.in_progress = true;
            }
        }

        let outcome =
            match tokio::time::timeout(Duration::from_secs(config.job_timeout_secs), job.run()).await
            {
                Ok(Ok(result)) => {
                    info!(
                        job = name,
                        imported = result.imported,
                        skipped = result.skipped,
                        errors = result.errors.len(),
                        "Import completed"
                    );
                    Ok(result)
                }
                Ok(Err(err)) => {
                    warn!(job = name, error = %err, "Import failed");
                    Err(SchedulerError::Failed(err.to_string()))
                }
                Err(_) => {
                    error!(
                        job = name,
                        timeout_secs = config.job_timeout_secs,
                        "Import timed out"
                    );
                    Err(SchedulerError::Failed("import timed out".to_string()))
                }
            };

        let mut map = status.write().await;
        if let Some(s) = map.get_mut(&name) {
            s.in_progress = false;
            s.last_run = Some(std::time::SystemTime::now());
            s.last_result = Some(match &outcome {
                Ok(result) => Ok(result.clone()),
                Err(e) => Err(e.to_string()),
            });
            s.next_run = Some(std::time::SystemTime::now() + job.interval());
        }

        outcome
    }

    async fn handle_manual(&self, request: ManualImportRequest) {
        let result = match self.jobs.iter().find(|j| j.name() == request.job_name) {
            Some(job) => {
                info!(job = request.job_name, "Manual import triggered");
                Self::perform(job, &self.status, &self.config).await
            }
            None => {
                warn!(job = request.job_name, "Manual import requested for unknown job");
                Err(SchedulerError::UnknownJob(request.job_name.clone()))
            }
        };
        let _ = request.response.send(result);
    }
}

/// Handle for triggering imports outside the schedule
#[derive(Clone)]
pub struct ManualImportHandle {
    tx: mpsc::Sender<ManualImportRequest>,
    status: StatusMap,
}

impl ManualImportHandle {
    /// Run an import for `job_name` now and wait for its result
    pub async fn trigger(&self, job_name: &str) -> Result<ImportResult, SchedulerError> {
        let (response, rx) = oneshot::channel();

        self.tx
            .send(ManualImportRequest {
                job_name: job_name.to_string(),
                response,
            })
            .await
            .map_err(|_| SchedulerError::NotRunning)?;

        rx.await.map_err(|_| SchedulerError::NotRunning)?
    }

    /// Snapshot of every job's status
    pub async fn status(&self) -> HashMap<String, JobStatus> {
        self.status.read().await.clone()
    }
}
