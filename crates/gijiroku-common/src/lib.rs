use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("empty upload")]
    EmptyFile,

    #[error("unsupported audio format: {0}")]
    InvalidFormat(String),

    #[error("corrupt audio file: {0}")]
    CorruptFile(String),

    #[error("whisper model load failed: {0}")]
    WhisperLoadFailed(String),

    #[error("whisper inference failed: {0}")]
    WhisperInferenceFailed(String),

    #[error("whisper inference timed out after {0:?}")]
    WhisperTimeout(Duration),

    #[error("LLM endpoint unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM request timed out after {0:?}")]
    LlmTimeout(Duration),

    #[error("LLM returned an unusable response: {0}")]
    LlmBadResponse(String),

    #[error("LLM model not found: {0}")]
    LlmModelMissing(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("job not completed: {0}")]
    JobNotCompleted(Uuid),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable, client-visible error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::FileTooLarge(_) => "FILE_TOO_LARGE",
            AppError::EmptyFile => "EMPTY_FILE",
            AppError::InvalidFormat(_) => "INVALID_FORMAT",
            AppError::CorruptFile(_) => "CORRUPT_FILE",
            AppError::WhisperLoadFailed(_) => "WHISPER_LOAD_FAILED",
            AppError::WhisperInferenceFailed(_) => "WHISPER_INFERENCE_FAILED",
            AppError::WhisperTimeout(_) => "WHISPER_TIMEOUT",
            AppError::LlmUnavailable(_) => "LLM_UNAVAILABLE",
            AppError::LlmTimeout(_) => "LLM_TIMEOUT",
            AppError::LlmBadResponse(_) => "LLM_BAD_RESPONSE",
            AppError::LlmModelMissing(_) => "LLM_MODEL_MISSING",
            AppError::Store(_) => "STORE_ERROR",
            AppError::JobNotFound(_) => "JOB_NOT_FOUND",
            AppError::JobNotCompleted(_) => "JOB_NOT_COMPLETED",
            AppError::Cancelled => "CANCELLED",
        }
    }

    /// Transient errors may be retried within a stage's retry budget.
    /// Network-level failures, 5xx-style backend hiccups and timeouts are
    /// transient; everything else fails the job outright.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::WhisperInferenceFailed(_)
                | AppError::WhisperTimeout(_)
                | AppError::LlmUnavailable(_)
                | AppError::LlmTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(AppError::FileTooLarge(1).code(), "FILE_TOO_LARGE");
        assert_eq!(AppError::EmptyFile.code(), "EMPTY_FILE");
        assert_eq!(
            AppError::InvalidFormat("x".into()).code(),
            "INVALID_FORMAT"
        );
        assert_eq!(
            AppError::LlmModelMissing("gemma".into()).code(),
            "LLM_MODEL_MISSING"
        );
        assert_eq!(AppError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::LlmUnavailable("refused".into()).is_transient());
        assert!(AppError::LlmTimeout(Duration::from_secs(1)).is_transient());
        assert!(AppError::WhisperTimeout(Duration::from_secs(1)).is_transient());
        assert!(AppError::WhisperInferenceFailed("x".into()).is_transient());

        assert!(!AppError::WhisperLoadFailed("x".into()).is_transient());
        assert!(!AppError::LlmBadResponse("x".into()).is_transient());
        assert!(!AppError::LlmModelMissing("x".into()).is_transient());
        assert!(!AppError::InvalidFormat("x".into()).is_transient());
    }
}
