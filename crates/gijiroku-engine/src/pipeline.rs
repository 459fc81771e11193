//! The transcription job engine.
//!
//! A fixed pool of worker tasks drains claimable jobs from the store and
//! drives each one through TRANSCRIBE → CORRECT → SUMMARIZE. Stage output
//! rows are the idempotency key: recovery after a crash simply re-runs the
//! stage whose row is missing. Progress only ever moves forward, and a
//! cancelled job swallows whatever its in-flight backend call returns.

use gijiroku_backends::{ChatBackend, ChatOptions, RetryPolicy, SpeechBackend, minutes, prompts};
use gijiroku_common::AppError;
use gijiroku_protocol::{Job, LogLevel, Stage, StageResult};
use gijiroku_store::{Store, StoreError};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Correction/summary confidence is not model-reported; these fixed values
/// are passed through to the stored rows untouched.
const SUMMARY_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub correct_timeout: Duration,
    pub summarize_timeout: Duration,
    /// Forwarded to the speech backend; `None` defers to its own default.
    pub language: Option<String>,
    pub retry: RetryPolicy,
    /// Idle wait between claim attempts when no wake-up arrives.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            correct_timeout: Duration::from_secs(120),
            summarize_timeout: Duration::from_secs(300),
            language: None,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

struct Inner {
    store: Arc<Store>,
    speech: Arc<dyn SpeechBackend>,
    chat: Arc<dyn ChatBackend>,
    config: EngineConfig,
    wake: Notify,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        speech: Arc<dyn SpeechBackend>,
        chat: Arc<dyn ChatBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                speech,
                chat,
                config,
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Requeue interrupted jobs and launch the worker pool.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        match self.inner.store.release_interrupted() {
            Ok(0) => {}
            Ok(n) => info!("requeued {n} interrupted job(s) for recovery"),
            Err(e) => error!("startup recovery scan failed: {e}"),
        }
        (0..self.inner.config.worker_count.max(1))
            .map(|id| {
                let inner = self.inner.clone();
                tokio::spawn(worker_loop(id, inner))
            })
            .collect()
    }

    /// Nudge an idle worker; called after every accepted upload.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

async fn worker_loop(worker_id: usize, inner: Arc<Inner>) {
    info!("worker {worker_id} started");
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }
        let claimed = match inner.store.claim_next_ready() {
            Ok(job) => job,
            Err(e) => {
                error!("worker {worker_id}: claim failed: {e}");
                None
            }
        };
        match claimed {
            Some(job) => run_job(worker_id, &inner, job).await,
            None => {
                tokio::select! {
                    _ = inner.wake.notified() => {}
                    _ = tokio::time::sleep(inner.config.poll_interval) => {}
                    _ = inner.shutdown.cancelled() => break,
                }
            }
        }
    }
    info!("worker {worker_id} stopped");
}

enum StageOutcome {
    Done,
    /// The job turned terminal under us; stop without writing anything.
    CancelObserved,
    Fatal(AppError),
    /// Store trouble: abort without touching the job so startup recovery
    /// can requeue it.
    StoreAbort(String),
}

async fn run_job(worker_id: usize, inner: &Inner, job: Job) {
    let job_id = job.id;
    let started = Instant::now();
    debug!(
        "worker {worker_id} picked up job {job_id} ({}, status {})",
        job.original_filename,
        job.status.as_str()
    );

    for stage in Stage::ALL {
        match inner.store.stage_exists(job_id, stage) {
            Ok(true) => {
                debug!("job {job_id}: {} output present, skipping", stage.as_str());
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                error!("job {job_id}: store error before {}: {e}", stage.as_str());
                return;
            }
        }

        match inner.store.is_cancel_requested(job_id) {
            Ok(false) => {}
            Ok(true) => {
                info!("job {job_id}: cancellation observed before {}", stage.as_str());
                audit(inner, job_id, LogLevel::Info, "CANCELLED", None);
                return;
            }
            Err(e) => {
                error!("job {job_id}: store error reading cancel flag: {e}");
                return;
            }
        }

        match run_stage(inner, &job, stage).await {
            StageOutcome::Done => {
                audit(
                    inner,
                    job_id,
                    LogLevel::Info,
                    &format!("stage {} completed", stage.as_str()),
                    None,
                );
            }
            StageOutcome::CancelObserved => {
                info!("job {job_id}: cancelled during {}", stage.as_str());
                audit(inner, job_id, LogLevel::Info, "CANCELLED", None);
                return;
            }
            StageOutcome::Fatal(e) => {
                let code = e.code();
                let message = e.to_string();
                error!("job {job_id}: {} failed: {message}", stage.as_str());
                if let Err(store_err) = inner.store.mark_failed(job_id, code, &message) {
                    error!("job {job_id}: could not record failure: {store_err}");
                    return;
                }
                audit(
                    inner,
                    job_id,
                    LogLevel::Error,
                    code,
                    Some(serde_json::json!({
                        "stage": stage.as_str(),
                        "message": message,
                    })),
                );
                return;
            }
            StageOutcome::StoreAbort(e) => {
                // Leave the job as-is; startup recovery requeues it.
                error!("job {job_id}: store error during {}: {e}", stage.as_str());
                return;
            }
        }
    }

    info!(
        "job {job_id}: completed in {:.1}s",
        started.elapsed().as_secs_f64()
    );
    audit(inner, job_id, LogLevel::Info, "COMPLETED", None);
}

async fn run_stage(inner: &Inner, job: &Job, stage: Stage) -> StageOutcome {
    let job_id = job.id;
    if let Err(e) = inner.store.update_progress(
        job_id,
        stage.in_flight_status(),
        stage.floor(),
        start_message(stage),
    ) {
        return store_outcome(e);
    }
    audit(
        inner,
        job_id,
        LogLevel::Info,
        &format!("status {}", stage.in_flight_status().as_str()),
        None,
    );

    let mut attempt: u32 = 0;
    loop {
        match inner.store.is_cancel_requested(job_id) {
            Ok(false) => {}
            Ok(true) => return StageOutcome::CancelObserved,
            Err(e) => return store_outcome(e),
        }

        match execute_stage(inner, job, stage).await {
            Ok(result) => {
                return match inner
                    .store
                    .complete_stage(job_id, &result, done_message(stage))
                {
                    Ok(()) => StageOutcome::Done,
                    Err(e) => store_outcome(e),
                };
            }
            Err(AppError::Cancelled) => return StageOutcome::CancelObserved,
            Err(AppError::Store(msg)) => return StageOutcome::StoreAbort(msg),
            Err(e @ AppError::JobNotFound(_)) => {
                return StageOutcome::StoreAbort(e.to_string());
            }
            Err(e) if inner.config.retry.should_retry(&e, attempt) => {
                let delay = inner.config.retry.delay_for_attempt(attempt);
                warn!(
                    "job {job_id}: {} attempt {} failed ({}), retrying in {delay:?}",
                    stage.as_str(),
                    attempt + 1,
                    e
                );
                audit(
                    inner,
                    job_id,
                    LogLevel::Warn,
                    e.code(),
                    Some(serde_json::json!({
                        "stage": stage.as_str(),
                        "attempt": attempt + 1,
                        "message": e.to_string(),
                    })),
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return StageOutcome::Fatal(e),
        }
    }
}

async fn execute_stage(
    inner: &Inner,
    job: &Job,
    stage: Stage,
) -> Result<StageResult, AppError> {
    let job_id = job.id;
    match stage {
        Stage::Transcribe => {
            if inner.speech.is_degraded() {
                return Err(AppError::WhisperLoadFailed(
                    "speech model unavailable; refusing new work".into(),
                ));
            }
            let meta = inner
                .store
                .get_audio_meta(job_id)?
                .ok_or_else(|| AppError::Store(format!("audio metadata missing for {job_id}")))?;
            inner.store.update_progress(
                job_id,
                stage.in_flight_status(),
                stage.midpoint(),
                start_message(stage),
            )?;
            let started = Instant::now();
            let transcription = inner
                .speech
                .transcribe(Path::new(&meta.file_path), inner.config.language.as_deref())
                .await?;
            debug!(
                "job {job_id}: transcribed {} chars in {} segment(s)",
                transcription.text.len(),
                transcription.segments.len()
            );
            Ok(StageResult::Transcribed {
                text: transcription.text,
                language: transcription.language,
                confidence: transcription.confidence,
                model: transcription.model,
                processing_ms: started.elapsed().as_millis() as u64,
            })
        }
        Stage::Correct => {
            let raw = inner
                .store
                .get_raw_transcript(job_id)?
                .ok_or_else(|| AppError::Store(format!("raw transcript missing for {job_id}")))?;
            let started = Instant::now();
            let reply = inner
                .chat
                .chat(
                    prompts::CORRECT_SYSTEM_PROMPT,
                    &prompts::correct_user_prompt(&raw.text),
                    &ChatOptions {
                        timeout: inner.config.correct_timeout,
                        ..Default::default()
                    },
                )
                .await?;
            inner.store.update_progress(
                job_id,
                stage.in_flight_status(),
                stage.midpoint(),
                start_message(stage),
            )?;
            Ok(StageResult::Corrected {
                text: reply.text.trim().to_string(),
                model: reply.model,
                processing_ms: started.elapsed().as_millis() as u64,
            })
        }
        Stage::Summarize => {
            let corrected = inner.store.get_corrected_transcript(job_id)?.ok_or_else(|| {
                AppError::Store(format!("corrected transcript missing for {job_id}"))
            })?;
            let started = Instant::now();
            let reply = inner
                .chat
                .chat(
                    prompts::SUMMARIZE_SYSTEM_PROMPT,
                    &prompts::summarize_user_prompt(&corrected.text),
                    &ChatOptions {
                        timeout: inner.config.summarize_timeout,
                        ..Default::default()
                    },
                )
                .await?;
            inner.store.update_progress(
                job_id,
                stage.in_flight_status(),
                stage.midpoint(),
                start_message(stage),
            )?;
            let (formatted_text, details) = minutes::parse_minutes(&reply.text);
            Ok(StageResult::Summarized {
                formatted_text,
                details,
                model: reply.model,
                confidence: SUMMARY_CONFIDENCE,
                processing_ms: started.elapsed().as_millis() as u64,
            })
        }
    }
}

fn store_outcome(err: StoreError) -> StageOutcome {
    match err {
        StoreError::TerminalJob(_, _) => StageOutcome::CancelObserved,
        other => StageOutcome::StoreAbort(other.to_string()),
    }
}

fn start_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Transcribe => "音声を文字起こししています",
        Stage::Correct => "文字起こしを校正しています",
        Stage::Summarize => "議事録を作成しています",
    }
}

fn done_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Transcribe => "文字起こしが完了しました",
        Stage::Correct => "校正が完了しました",
        Stage::Summarize => "処理が完了しました",
    }
}

/// ProcessingLog writes are best-effort and deliberately outside the state
/// transactions.
fn audit(
    inner: &Inner,
    job_id: Uuid,
    level: LogLevel,
    message: &str,
    details: Option<serde_json::Value>,
) {
    if let Err(e) = inner
        .store
        .append_log(job_id, level, message, details.as_ref())
    {
        warn!("job {job_id}: audit append failed: {e}");
    }
}
