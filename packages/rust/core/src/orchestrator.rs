//! Pipeline orchestrator: job state machine, worker pool, and the narrow
//! submit/status/cancel contract exposed to the front end.
//!
//! Jobs run concurrently under a semaphore cap; stages within a job are
//! strictly sequential. Every transition (including retry-count bumps) is
//! persisted before the next stage runs, so a restarted process resumes
//! each job from its last completed stage. Cancellation is cooperative: an
//! in-flight stage completes or times out before the job moves to
//! `Abandoned`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, broadcast, watch};
use tracing::{error, info, instrument, warn};

use autoblogger_shared::{
    ArticleJob, AutoBloggerError, JobId, JobState, PipelineStage, Result, RetriesConfig,
    SourceReference,
};
use autoblogger_storage::Storage;

use crate::events::JobEvent;
use crate::pipeline::Pipeline;
use crate::retry::{backoff_delay, budget_exhausted};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Sequences pipeline stages per job and tracks per-stage status.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: Pipeline,
    storage: Arc<Storage>,
    retries: RetriesConfig,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<JobEvent>,
    /// Cancellation flags for jobs currently running in this process.
    cancels: Mutex<HashMap<JobId, watch::Sender<bool>>>,
}

impl Orchestrator {
    /// Create an orchestrator with a worker pool of `max_concurrent_jobs`.
    pub fn new(
        pipeline: Pipeline,
        storage: Arc<Storage>,
        retries: RetriesConfig,
        max_concurrent_jobs: u32,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                pipeline,
                storage,
                retries,
                semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1) as usize)),
                events,
                cancels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submit a new article job. Returns its stable identifier immediately;
    /// the job runs on the worker pool.
    #[instrument(skip_all, fields(source = %source.label()))]
    pub async fn submit(&self, source: SourceReference) -> Result<JobId> {
        let job = ArticleJob::new(source);
        let id = job.id.clone();
        self.inner.storage.upsert_job(&job).await?;
        info!(job_id = %id, "job submitted");

        self.spawn_job(id.clone()).await;
        Ok(id)
    }

    /// Current state of a job, read from persistent storage.
    pub async fn status(&self, id: &JobId) -> Result<ArticleJob> {
        self.inner
            .storage
            .get_job(id)
            .await?
            .ok_or_else(|| AutoBloggerError::Storage(format!("unknown job {id}")))
    }

    /// Request cooperative cancellation. A stage in flight completes or
    /// times out first; the job then transitions to `Abandoned`.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        let cancels = self.inner.cancels.lock().await;
        if let Some(flag) = cancels.get(id) {
            let _ = flag.send(true);
            info!(job_id = %id, "cancellation requested");
            return Ok(());
        }
        drop(cancels);

        // Not running in this process: abandon directly if non-terminal.
        let mut job = self.status(id).await?;
        if !job.state.is_terminal() {
            job.state = JobState::Abandoned;
            job.updated_at = chrono::Utc::now();
            self.inner.persist_and_emit(&job).await?;
        }
        Ok(())
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Spawn workers for every persisted non-terminal job (restart
    /// recovery). Returns the resumed job ids.
    pub async fn resume_pending(&self) -> Result<Vec<JobId>> {
        let pending = self.inner.storage.list_resumable().await?;
        let mut resumed = Vec::new();

        for job in pending {
            let running = self.inner.cancels.lock().await.contains_key(&job.id);
            if running {
                continue;
            }
            info!(job_id = %job.id, state = %job.state.label(), "resuming job");
            self.spawn_job(job.id.clone()).await;
            resumed.push(job.id);
        }
        Ok(resumed)
    }

    /// Block until the job reaches a terminal state and return it.
    pub async fn wait_terminal(&self, id: &JobId) -> Result<ArticleJob> {
        let mut events = self.subscribe();
        loop {
            let job = self.status(id).await?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            // Wake on the next event for this job, or poll as a fallback if
            // the channel lags.
            tokio::select! {
                _ = events.recv() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    /// Spawn the worker task for a job.
    async fn spawn_job(&self, id: JobId) {
        let (tx, rx) = watch::channel(false);
        self.inner.cancels.lock().await.insert(id.clone(), tx);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_job(inner, id, rx).await;
        });
    }
}

impl Inner {
    /// Persist the job then publish the state change.
    async fn persist_and_emit(&self, job: &ArticleJob) -> Result<()> {
        self.storage.upsert_job(job).await?;
        let _ = self.events.send(JobEvent::StateChanged {
            job_id: job.id.clone(),
            state: job.state.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

/// Drive one job through its stages until a terminal state.
async fn run_job(inner: Arc<Inner>, id: JobId, cancel_rx: watch::Receiver<bool>) {
    // Worker-pool slot; jobs queue here when the pool is saturated.
    let Ok(_permit) = inner.semaphore.acquire().await else {
        return;
    };

    loop {
        let job = match inner.storage.get_job(&id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(job_id = %id, "job vanished from storage");
                break;
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "failed to load job");
                break;
            }
        };

        if job.state.is_terminal() {
            break;
        }

        // Cooperative cancellation between stage boundaries.
        if *cancel_rx.borrow() {
            let mut job = job;
            job.state = JobState::Abandoned;
            job.updated_at = chrono::Utc::now();
            if let Err(e) = inner.persist_and_emit(&job).await {
                error!(job_id = %id, error = %e, "failed to persist abandonment");
            }
            info!(job_id = %id, "job abandoned");
            break;
        }

        let Some(stage) = next_stage(&job.state) else {
            break;
        };

        if let Err(e) = run_stage_once(&inner, job, stage).await {
            error!(job_id = %id, error = %e, "failed to persist job transition");
            break;
        }
    }

    inner.cancels.lock().await.remove(&id);
}

/// Run one stage attempt and persist the resulting transition.
///
/// Success advances the state machine; a retryable failure bumps the
/// stage's retry counter (failing the job once the budget is exhausted and
/// backing off otherwise); a permanent failure fails the job immediately.
async fn run_stage_once(inner: &Arc<Inner>, mut job: ArticleJob, stage: PipelineStage) -> Result<()> {
    if job.state != JobState::running(stage) {
        job.state = JobState::running(stage);
        job.updated_at = chrono::Utc::now();
        inner.persist_and_emit(&job).await?;
    }

    match inner.pipeline.run_stage(stage, &job, &inner.storage).await {
        Ok(receipt) => {
            if let Some(receipt) = receipt {
                job.receipt = Some(receipt);
            }
            job.state = match stage_after(stage) {
                Some(next) => JobState::running(next),
                None => JobState::Succeeded,
            };
            job.updated_at = chrono::Utc::now();
            inner.persist_and_emit(&job).await?;
            Ok(())
        }
        Err(e) => {
            let kind = e.kind();
            let message = e.to_string();
            job.record_failure(stage, kind, message.clone());

            if e.is_retryable() {
                job.retries.bump(stage);
                let attempts = job.retries.get(stage);

                if budget_exhausted(&inner.retries, stage, attempts) {
                    warn!(job_id = %job.id, %stage, attempts, "retry budget exhausted");
                    job.state = JobState::Failed {
                        stage,
                        kind,
                        message: format!(
                            "retry budget exhausted after {attempts} attempts: {message}"
                        ),
                    };
                    inner.persist_and_emit(&job).await?;
                } else {
                    warn!(job_id = %job.id, %stage, attempts, error = %message, "stage failed, retrying");
                    inner.storage.upsert_job(&job).await?;
                    let _ = inner.events.send(JobEvent::StageRetrying {
                        job_id: job.id.clone(),
                        stage,
                        attempt: attempts,
                        error: message,
                    });
                    tokio::time::sleep(backoff_delay(&inner.retries, attempts)).await;
                }
            } else {
                warn!(job_id = %job.id, %stage, error = %message, "permanent stage failure");
                job.state = JobState::Failed {
                    stage,
                    kind,
                    message,
                };
                inner.persist_and_emit(&job).await?;
            }
            Ok(())
        }
    }
}

/// The stage a job in this state should run (re-running the in-flight stage
/// after a restart). `None` for terminal states.
fn next_stage(state: &JobState) -> Option<PipelineStage> {
    match state {
        JobState::Created | JobState::Extracting => Some(PipelineStage::Extract),
        JobState::Rewriting => Some(PipelineStage::Rewrite),
        JobState::Enriching => Some(PipelineStage::Enrich),
        JobState::SourcingImage => Some(PipelineStage::SourceImage),
        JobState::Publishing => Some(PipelineStage::Publish),
        JobState::Succeeded | JobState::Failed { .. } | JobState::Abandoned => None,
    }
}

/// The stage that follows `stage`, or `None` after publish.
fn stage_after(stage: PipelineStage) -> Option<PipelineStage> {
    match stage {
        PipelineStage::Extract => Some(PipelineStage::Rewrite),
        PipelineStage::Rewrite => Some(PipelineStage::Enrich),
        PipelineStage::Enrich => Some(PipelineStage::SourceImage),
        PipelineStage::SourceImage => Some(PipelineStage::Publish),
        PipelineStage::Publish => None,
    }
}
