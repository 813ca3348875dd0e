//! The job service: submit, run, poll, fetch, cancel, delete.

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use plotline_pipeline::{
    Device, DeviceSelector, ExportFormat, HookRegistry, Pipeline, PipelineError, PipelineObserver,
    PipelineOutput, ProcessingParams, ProviderRegistry, StageKind,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::events::ProgressEvent;
use crate::record::{JobError, JobId, JobRecord, JobResult, JobStatus};
use crate::registry;
use crate::store::{JobInput, JobStore};

const TRACING_TARGET: &str = "plotline_jobs::service";

struct Inner {
    config: ServiceConfig,
    pipeline: Pipeline,
    store: JobStore,
    events: broadcast::Sender<ProgressEvent>,
}

/// Runs pipeline jobs and tracks their records.
///
/// Cheap to clone; clones share the same jobs.
#[derive(Clone)]
pub struct JobService {
    inner: Arc<Inner>,
}

impl JobService {
    /// A service with every workspace provider, the built-in hooks, and the
    /// process-wide device.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_parts(
            config,
            registry::discover(),
            HookRegistry::with_builtin_hooks(),
            DeviceSelector::global(),
        )
    }

    /// A service over explicit registries and device.
    #[must_use]
    pub fn with_parts(
        config: ServiceConfig,
        providers: ProviderRegistry,
        hooks: HookRegistry,
        device: Device,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let pipeline = Pipeline::new(Arc::new(providers), hooks, device, config.limits());
        Self {
            inner: Arc::new(Inner {
                config,
                pipeline,
                store: JobStore::new(),
                events,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.inner.pipeline.device()
    }

    /// Validate and enqueue a job.
    ///
    /// Nothing is recorded when validation fails.
    ///
    /// # Errors
    ///
    /// [`PipelineError::PayloadTooLarge`] when `image` exceeds
    /// `max_payload_bytes`, or [`PipelineError::Validation`] for bad
    /// parameters.
    pub fn submit(&self, image: Vec<u8>, params: ProcessingParams) -> Result<JobId, PipelineError> {
        let max = self.inner.config.max_payload_bytes;
        if image.len() > max {
            return Err(PipelineError::PayloadTooLarge(format!(
                "image is {} bytes, the limit is {max}",
                image.len()
            )));
        }
        params.validate(self.inner.pipeline.limits())?;

        let id = JobId::new();
        self.inner.store.insert(id, JobInput {
            image: image.into(),
            params,
        });
        tracing::info!(target: TRACING_TARGET, job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Run a pending job to completion on a blocking worker.
    ///
    /// Returns the terminal record whether the job completed or failed;
    /// the failure is recorded on it.
    ///
    /// Each stage gets `stage_timeout_ms`. When a stage overruns, the job
    /// fails with [`PipelineError::Timeout`] right away and the worker is
    /// cancelled; the overrunning provider call runs to its end in the
    /// background and its output is discarded.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids and
    /// [`PipelineError::Internal`] when the job already ran.
    pub async fn run(&self, id: JobId) -> Result<JobRecord, PipelineError> {
        let store = &self.inner.store;
        let Some(input) = store.take_input(id)? else {
            return Err(PipelineError::Internal(format!("job `{id}` has already run")));
        };
        let device = self.device();
        store.update(id, |record| record.start(device))?;
        tracing::info!(target: TRACING_TARGET, job_id = %id, device = %device, "Job started");

        let cancel = store.cancel_token(id)?;
        let (stage_tx, stage_rx) = watch::channel(StageKind::Preprocess);
        let observer = JobObserver {
            id,
            inner: Arc::clone(&self.inner),
            cancel: cancel.clone(),
            stage: stage_tx,
        };
        let inner = Arc::clone(&self.inner);
        let worker = tokio::task::spawn_blocking(move || {
            inner.pipeline.run(input.image, &input.params, &observer)
        });
        let outcome = self.watch_stages(worker, stage_rx, &cancel).await;

        match outcome {
            Ok(output) => {
                let result = JobResult {
                    result_ref: output.bundle.result_ref.clone(),
                    formats: output.bundle.outputs.keys().copied().collect(),
                    stats: output.bundle.stats.clone(),
                    diagnostics: output.diagnostics,
                };
                let result_ref = result.result_ref.clone();
                store.set_bundle(id, output.bundle)?;
                let ((), record) = store.update(id, |record| record.complete(result))?;
                tracing::info!(
                    target: TRACING_TARGET,
                    job_id = %id,
                    %result_ref,
                    paths = output.document.len(),
                    "Job completed"
                );
                self.publish(ProgressEvent::Complete {
                    job_id: id,
                    result_ref,
                });
                Ok(record)
            }
            Err(err) => {
                let error = JobError::from(&err);
                let ((), record) = store.update(id, |record| record.fail(error.clone()))?;
                tracing::error!(
                    target: TRACING_TARGET,
                    job_id = %id,
                    kind = %error.kind,
                    error = %err,
                    "Job failed"
                );
                self.publish(ProgressEvent::Error { job_id: id, error });
                Ok(record)
            }
        }
    }

    /// Wait for `worker`, restarting the stage clock whenever a stage
    /// begins.
    async fn watch_stages(
        &self,
        mut worker: JoinHandle<Result<PipelineOutput, PipelineError>>,
        mut stage: watch::Receiver<StageKind>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let limit = self.inner.config.stage_timeout();
        let joined = loop {
            tokio::select! {
                biased;
                joined = &mut worker => break joined,
                started = tokio::time::timeout(limit, stage.changed()) => match started {
                    Ok(Ok(())) => {}
                    // The worker dropped its observer, so it is about to return.
                    Ok(Err(_)) => break (&mut worker).await,
                    Err(_) => {
                        cancel.cancel();
                        let stage = *stage.borrow();
                        return Err(PipelineError::Timeout {
                            stage,
                            limit_ms: self.inner.config.stage_timeout_ms,
                        });
                    }
                },
            }
        };
        joined.unwrap_or_else(|join| {
            Err(PipelineError::Internal(format!("job worker failed: {join}")))
        })
    }

    /// Run a job on the tokio runtime in the background.
    #[must_use = "the handle reports the job's terminal record"]
    pub fn spawn(&self, id: JobId) -> JoinHandle<Result<JobRecord, PipelineError>> {
        let service = self.clone();
        tokio::spawn(async move { service.run(id).await })
    }

    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn get_status(&self, id: JobId) -> Result<JobRecord, PipelineError> {
        self.inner.store.snapshot(id)
    }

    /// The serialized document of a completed job.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotFound`] for unknown ids
    /// - [`PipelineError::NotReady`] until the job completes, and for
    ///   failed jobs (carrying the failure message)
    /// - [`PipelineError::Validation`] when the job did not produce `format`
    pub fn get_result(&self, id: JobId, format: ExportFormat) -> Result<String, PipelineError> {
        let record = self.inner.store.snapshot(id)?;
        match record.status {
            JobStatus::Completed => {}
            JobStatus::Failed => {
                let reason = record
                    .error
                    .map_or_else(|| "job failed".to_owned(), |e| e.to_string());
                return Err(PipelineError::NotReady {
                    id: id.to_string(),
                    reason,
                });
            }
            status @ (JobStatus::Pending | JobStatus::Processing) => {
                return Err(PipelineError::NotReady {
                    id: id.to_string(),
                    reason: format!("job is {status}"),
                });
            }
        }

        let bundle = self.inner.store.bundle(id)?.ok_or_else(|| {
            PipelineError::Internal(format!("completed job `{id}` has no outputs"))
        })?;
        bundle.get(format).map(str::to_owned).ok_or_else(|| {
            PipelineError::validation("format", format!("job `{id}` did not produce {format}"))
        })
    }

    /// Mark a job for cancellation.
    ///
    /// The pipeline stops before its next stage; a stage already running
    /// finishes first. Cancelling a finished job has no effect.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids.
    pub fn cancel(&self, id: JobId) -> Result<(), PipelineError> {
        let token = self.inner.store.cancel_token(id)?;
        if !token.is_cancelled() {
            token.cancel();
            tracing::info!(target: TRACING_TARGET, job_id = %id, "Cancellation requested");
        }
        Ok(())
    }

    /// Forget a finished job and free its input and outputs.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotFound`] for unknown ids and
    /// [`PipelineError::NotReady`] while the job is pending or processing.
    pub fn delete(&self, id: JobId) -> Result<JobRecord, PipelineError> {
        let store = &self.inner.store;
        let status = store.snapshot(id)?.status;
        if !status.is_terminal() {
            return Err(PipelineError::NotReady {
                id: id.to_string(),
                reason: format!("job is {status}; only finished jobs can be deleted"),
            });
        }
        let record = store.remove(id)?;
        tracing::info!(target: TRACING_TARGET, job_id = %id, "Job deleted");
        Ok(record)
    }

    /// Delete every finished job last updated more than `older_than` ago.
    /// Returns the ids removed, oldest submission first.
    pub fn cleanup(&self, older_than: Duration) -> Vec<JobId> {
        let now = Timestamp::now();
        let Ok(cutoff) = now.checked_sub(older_than) else {
            return Vec::new();
        };
        let removed: Vec<JobId> = self
            .inner
            .store
            .remove_where(|record| record.status.is_terminal() && record.updated_at <= cutoff)
            .into_iter()
            .map(|record| record.id)
            .collect();
        if !removed.is_empty() {
            tracing::info!(
                target: TRACING_TARGET,
                removed = removed.len(),
                %cutoff,
                "Cleaned up old jobs"
            );
        }
        removed
    }

    /// Receive events for every job from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshots of every job, oldest submission first.
    #[must_use]
    pub fn list(&self) -> Vec<JobRecord> {
        self.inner.store.list()
    }

    fn publish(&self, event: ProgressEvent) {
        self.inner.publish(event);
    }
}

impl Inner {
    fn publish(&self, event: ProgressEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

/// Bridges pipeline callbacks to one job's record and event stream.
struct JobObserver {
    id: JobId,
    inner: Arc<Inner>,
    cancel: CancellationToken,
    stage: watch::Sender<StageKind>,
}

impl PipelineObserver for JobObserver {
    fn stage_started(&self, stage: StageKind) {
        tracing::debug!(target: TRACING_TARGET, job_id = %self.id, stage = %stage, "Stage started");
        self.stage.send_replace(stage);
    }

    fn stage_completed(&self, stage: StageKind, percent: u8) {
        match self
            .inner
            .store
            .update(self.id, |record| Ok(record.advance(stage, percent)))
        {
            Ok((true, record)) => self.inner.publish(ProgressEvent::Progress {
                job_id: self.id,
                percent: record.progress,
                stage,
            }),
            Ok((false, _)) => {}
            Err(err) => tracing::warn!(
                target: TRACING_TARGET,
                job_id = %self.id,
                error = %err,
                "Failed to record progress"
            ),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
