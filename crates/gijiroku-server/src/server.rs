//! HTTP surface: a stateless façade over the store and the intake.
//!
//! All state lives in the store; handlers validate, translate and map
//! errors onto the common envelope. The engine is only ever nudged, never
//! driven, from here.

use crate::error::{ApiFailure, ApiResult};
use crate::files;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use gijiroku_backends::{ChatBackend, SpeechBackend};
use gijiroku_engine::{Engine, Intake};
use gijiroku_protocol::{
    ApiEnvelope, HealthView, JobStatus, JobView, SummaryView, UsageType,
};
use gijiroku_store::Store;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

/// Slack on top of the upload limit so an oversized file reaches intake and
/// is rejected with a proper FILE_TOO_LARGE envelope instead of a framework
/// error.
const BODY_LIMIT_SLACK: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub intake: Arc<Intake>,
    pub engine: Engine,
    pub speech: Arc<dyn SpeechBackend>,
    pub chat: Arc<dyn ChatBackend>,
    pub max_file_size: u64,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_file_size as usize + BODY_LIMIT_SLACK;
    Router::new()
        .route(
            "/api/v1/transcriptions",
            post(create_transcription).get(list_transcriptions),
        )
        .route(
            "/api/v1/transcriptions/:id",
            get(get_transcription).delete(delete_transcription),
        )
        .route("/api/v1/transcriptions/:id/summary", get(get_summary))
        .route(
            "/api/v1/files/:id/transcription.txt",
            get(files::download_transcription),
        )
        .route("/api/v1/files/:id/summary.txt", get(files::download_summary))
        .route("/api/v1/files/:id/export", get(files::download_export))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub fn parse_job_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiFailure::not_found(format!("unknown job {raw}")))
}

async fn create_transcription(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ApiEnvelope<JobView>>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut usage_type = UsageType::Meeting;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiFailure::invalid_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ApiFailure::invalid_request(format!("could not read upload: {e}"))
                })?;
                file = Some((filename, bytes.to_vec()));
            }
            "usage_type" => {
                let value = field.text().await.map_err(|e| {
                    ApiFailure::invalid_request(format!("could not read usage_type: {e}"))
                })?;
                usage_type = UsageType::parse(value.trim()).ok_or_else(|| {
                    ApiFailure::invalid_request(format!("unknown usage_type `{value}`"))
                })?;
            }
            other => debug!("ignoring unexpected multipart field `{other}`"),
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiFailure::invalid_request("missing `file` field"))?;
    let job = state.intake.accept(&filename, bytes, usage_type).await?;
    state.engine.wake();

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::ok(JobView::from_job(&job))),
    ))
}

async fn list_transcriptions(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiEnvelope<Vec<JobView>>>> {
    let jobs = state.store.list_jobs(100)?;
    let views = jobs.iter().map(JobView::from_job).collect();
    Ok(Json(ApiEnvelope::ok(views)))
}

async fn get_transcription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiEnvelope<JobView>>> {
    let id = parse_job_id(&id)?;
    let results = state.store.get_results(id)?;
    Ok(Json(ApiEnvelope::ok(JobView::from_results(&results))))
}

async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiEnvelope<SummaryView>>> {
    let id = parse_job_id(&id)?;
    let results = state.store.get_results(id)?;
    if results.job.status != JobStatus::Completed {
        return Err(ApiFailure::not_completed(format!(
            "job {id} is {}",
            results.job.status.as_str()
        )));
    }
    let summary = results
        .summary
        .ok_or_else(|| ApiFailure::internal(format!("summary row missing for {id}")))?;
    Ok(Json(ApiEnvelope::ok(SummaryView::from_summary(&summary))))
}

/// Idempotent: cancelling a terminated job re-reports its state with 200.
async fn delete_transcription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiEnvelope<JobView>>> {
    let id = parse_job_id(&id)?;
    state.store.cancel(id)?;
    let job = state
        .store
        .get_job(id)?
        .ok_or_else(|| ApiFailure::not_found(format!("unknown job {id}")))?;
    Ok(Json(ApiEnvelope::ok(JobView::from_job(&job))))
}

async fn health(State(state): State<AppState>) -> Json<ApiEnvelope<HealthView>> {
    let store_ok = state.store.count_jobs().is_ok();
    let llm_ok = state.chat.ping().await;
    let whisper_ok = !state.speech.is_degraded();
    let all_ok = store_ok && llm_ok && whisper_ok;

    fn flag(ok: bool) -> String {
        if ok { "OK" } else { "DEGRADED" }.to_string()
    }

    Json(ApiEnvelope::ok(HealthView {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        store: flag(store_ok),
        llm: flag(llm_ok),
        whisper: flag(whisper_ok),
    }))
}
