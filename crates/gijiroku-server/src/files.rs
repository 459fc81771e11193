//! Artifact downloads for completed jobs.

use crate::error::{ApiFailure, ApiResult};
use crate::server::{AppState, parse_job_id};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use gijiroku_protocol::{JobResults, JobStatus};
use std::io::Write;
use uuid::Uuid;
use zip::write::SimpleFileOptions;

pub async fn download_transcription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let results = completed_results(&state, &id)?;
    let corrected = results
        .corrected
        .ok_or_else(|| ApiFailure::internal(format!("corrected transcript missing for {id}")))?;
    Ok(attachment(
        "text/plain; charset=utf-8",
        &format!("{}_transcription.txt", results.job.id),
        corrected.text.into_bytes(),
    ))
}

pub async fn download_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let results = completed_results(&state, &id)?;
    let summary = results
        .summary
        .ok_or_else(|| ApiFailure::internal(format!("summary missing for {id}")))?;
    Ok(attachment(
        "text/plain; charset=utf-8",
        &format!("{}_summary.txt", results.job.id),
        summary.formatted_text.into_bytes(),
    ))
}

pub async fn download_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let results = completed_results(&state, &id)?;
    let archive = build_export_zip(&results)?;
    Ok(attachment(
        "application/zip",
        &format!("{}_export.zip", results.job.id),
        archive,
    ))
}

fn completed_results(state: &AppState, raw_id: &str) -> ApiResult<JobResults> {
    let id: Uuid = parse_job_id(raw_id)?;
    let results = state.store.get_results(id)?;
    if results.job.status != JobStatus::Completed {
        return Err(ApiFailure::not_completed(format!(
            "job {id} is {}",
            results.job.status.as_str()
        )));
    }
    Ok(results)
}

fn build_export_zip(results: &JobResults) -> ApiResult<Vec<u8>> {
    let raw = results
        .raw
        .as_ref()
        .ok_or_else(|| ApiFailure::internal("raw transcript missing"))?;
    let corrected = results
        .corrected
        .as_ref()
        .ok_or_else(|| ApiFailure::internal("corrected transcript missing"))?;
    let summary = results
        .summary
        .as_ref()
        .ok_or_else(|| ApiFailure::internal("summary missing"))?;

    let summary_json = serde_json::json!({
        "details": summary.details,
        "model_used": summary.model,
        "confidence": summary.confidence,
    });

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let entries: [(&str, Vec<u8>); 4] = [
        ("transcription.txt", corrected.text.clone().into_bytes()),
        ("transcription_raw.txt", raw.text.clone().into_bytes()),
        ("summary.md", summary.formatted_text.clone().into_bytes()),
        (
            "summary.json",
            serde_json::to_vec_pretty(&summary_json)
                .map_err(|e| ApiFailure::internal(format!("encode summary.json: {e}")))?,
        ),
    ];
    for (name, contents) in entries {
        writer
            .start_file(name, options.clone())
            .map_err(|e| ApiFailure::internal(format!("zip entry {name}: {e}")))?;
        writer
            .write_all(&contents)
            .map_err(|e| ApiFailure::internal(format!("zip write {name}: {e}")))?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| ApiFailure::internal(format!("finalize zip: {e}")))?;
    Ok(cursor.into_inner())
}

fn attachment(content_type: &str, filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}
