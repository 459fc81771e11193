//! Shared domain and wire types for the transcription service.
//!
//! Everything the store persists, the engine advances and the HTTP surface
//! serves is defined here so the other crates agree on one vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle states. Terminal states are never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Uploaded,
    Transcribing,
    Correcting,
    Summarizing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "UPLOADED",
            JobStatus::Transcribing => "TRANSCRIBING",
            JobStatus::Correcting => "CORRECTING",
            JobStatus::Summarizing => "SUMMARIZING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOADED" => Some(JobStatus::Uploaded),
            "TRANSCRIBING" => Some(JobStatus::Transcribing),
            "CORRECTING" => Some(JobStatus::Correcting),
            "SUMMARIZING" => Some(JobStatus::Summarizing),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// What the recording is; `interview` is accepted but currently summarized
/// with the meeting prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageType {
    Meeting,
    Interview,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::Meeting => "meeting",
            UsageType::Interview => "interview",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meeting" => Some(UsageType::Meeting),
            "interview" => Some(UsageType::Interview),
            _ => None,
        }
    }
}

/// The three pipeline stages, each with a fixed progress window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcribe,
    Correct,
    Summarize,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Transcribe, Stage::Correct, Stage::Summarize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcribe => "transcribe",
            Stage::Correct => "correct",
            Stage::Summarize => "summarize",
        }
    }

    /// Status reported while this stage runs.
    pub fn in_flight_status(&self) -> JobStatus {
        match self {
            Stage::Transcribe => JobStatus::Transcribing,
            Stage::Correct => JobStatus::Correcting,
            Stage::Summarize => JobStatus::Summarizing,
        }
    }

    /// Status written when this stage's output is committed.
    pub fn next_status(&self) -> JobStatus {
        match self {
            Stage::Transcribe => JobStatus::Correcting,
            Stage::Correct => JobStatus::Summarizing,
            Stage::Summarize => JobStatus::Completed,
        }
    }

    /// Progress posted when the stage starts.
    pub fn floor(&self) -> u8 {
        match self {
            Stage::Transcribe => 10,
            Stage::Correct => 50,
            Stage::Summarize => 70,
        }
    }

    /// Advisory progress posted while the backend call is in flight.
    pub fn midpoint(&self) -> u8 {
        match self {
            Stage::Transcribe => 30,
            Stage::Correct => 60,
            Stage::Summarize => 90,
        }
    }

    /// Progress committed together with the stage output.
    pub fn ceiling(&self) -> u8 {
        match self {
            Stage::Transcribe => 50,
            Stage::Correct => 70,
            Stage::Summarize => 100,
        }
    }
}

/// One end-to-end processing unit, created by intake and advanced by the
/// engine. `progress` never decreases while the job is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_size: u64,
    pub content_hash: String,
    pub mime_type: String,
    pub usage_type: UsageType,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields intake hands to the store when creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub original_filename: String,
    pub stored_filename: String,
    pub file_size: u64,
    pub content_hash: String,
    pub mime_type: String,
    pub usage_type: UsageType,
}

/// Technical properties reported by the audio prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioProps {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: Option<u32>,
}

/// 1:1 with a job; immutable after intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioMeta {
    pub job_id: Uuid,
    pub file_path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Output of the speech backend.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub confidence: f64,
    pub model: String,
}

/// Output of the chat backend.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub model: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTranscript {
    pub job_id: Uuid,
    pub text: String,
    pub language: String,
    pub confidence: f64,
    pub model: String,
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectedTranscript {
    pub job_id: Uuid,
    pub text: String,
    pub model: String,
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Structured breakdown of the generated minutes. Headings the model omits
/// come back as empty lists (or `None` for the next meeting).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryDetails {
    pub agenda: Vec<String>,
    pub decisions: Vec<String>,
    pub todo: Vec<String>,
    pub next_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_meeting: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub job_id: Uuid,
    pub formatted_text: String,
    pub details: SummaryDetails,
    pub model: String,
    pub confidence: f64,
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A finished stage, ready to be committed atomically with the status
/// transition. The stage-output row doubles as the idempotency key for
/// crash recovery.
#[derive(Debug, Clone)]
pub enum StageResult {
    Transcribed {
        text: String,
        language: String,
        confidence: f64,
        model: String,
        processing_ms: u64,
    },
    Corrected {
        text: String,
        model: String,
        processing_ms: u64,
    },
    Summarized {
        formatted_text: String,
        details: SummaryDetails,
        model: String,
        confidence: f64,
        processing_ms: u64,
    },
}

impl StageResult {
    pub fn stage(&self) -> Stage {
        match self {
            StageResult::Transcribed { .. } => Stage::Transcribe,
            StageResult::Corrected { .. } => Stage::Correct,
            StageResult::Summarized { .. } => Stage::Summarize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Append-only audit record for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub job_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Read projection joining a job with whatever stage outputs exist.
#[derive(Debug, Clone)]
pub struct JobResults {
    pub job: Job,
    pub raw: Option<RawTranscript>,
    pub corrected: Option<CorrectedTranscript>,
    pub summary: Option<Summary>,
}

/// Common JSON envelope for every API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
            timestamp: Utc::now(),
        }
    }
}

/// Job envelope served by `GET /transcriptions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub status_code: JobStatus,
    pub progress: u8,
    pub message: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub usage_type: UsageType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription_result: Option<TranscriptionResultView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResultView {
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_text: Option<String>,
    pub language: String,
    pub confidence: f64,
    pub model_used: String,
}

impl JobView {
    pub fn from_results(results: &JobResults) -> Self {
        let job = &results.job;
        let error = match (&job.error_code, &job.error_message) {
            (Some(code), message) => Some(ApiError {
                code: code.clone(),
                message: message.clone().unwrap_or_default(),
            }),
            _ => None,
        };
        let transcription_result = results.raw.as_ref().map(|raw| TranscriptionResultView {
            raw_text: raw.text.clone(),
            corrected_text: results.corrected.as_ref().map(|c| c.text.clone()),
            language: raw.language.clone(),
            confidence: raw.confidence,
            model_used: raw.model.clone(),
        });
        Self {
            id: job.id,
            status_code: job.status,
            progress: job.progress,
            message: job.message.clone(),
            original_filename: job.original_filename.clone(),
            mime_type: job.mime_type.clone(),
            file_size: job.file_size,
            usage_type: job.usage_type,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error,
            transcription_result,
        }
    }

    pub fn from_job(job: &Job) -> Self {
        Self::from_results(&JobResults {
            job: job.clone(),
            raw: None,
            corrected: None,
            summary: None,
        })
    }
}

/// Summary envelope served by `GET /transcriptions/{id}/summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryView {
    pub formatted_text: String,
    pub details: SummaryDetails,
    pub model_used: String,
    pub confidence: f64,
}

impl SummaryView {
    pub fn from_summary(summary: &Summary) -> Self {
        Self {
            formatted_text: summary.formatted_text.clone(),
            details: summary.details.clone(),
            model_used: summary.model.clone(),
            confidence: summary.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthView {
    pub status: String,
    pub store: String,
    pub llm: String,
    pub whisper: String,
}
