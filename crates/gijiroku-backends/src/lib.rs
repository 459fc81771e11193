//! Adapters for the two inference backends.
//!
//! Both clients are pure adapters: they map transport and model failures to
//! the shared error kinds and carry no business logic. Retrying is driven by
//! the engine via [`RetryPolicy`] so every attempt shows up in the job's
//! audit trail.

pub mod llm;
pub mod minutes;
pub mod probe;
pub mod prompts;
pub mod retry;
pub mod whisper;

use async_trait::async_trait;
use gijiroku_common::Result;
use gijiroku_protocol::{ChatReply, Transcription};
use std::path::Path;
use std::time::Duration;

/// Audio file in, transcript out.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Transcription>;

    /// True once the model failed to load; callers fail fast instead of
    /// re-triggering the load on every job.
    fn is_degraded(&self) -> bool {
        false
    }
}

/// Prompt pair in, completion out.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &ChatOptions,
    ) -> Result<ChatReply>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            temperature: 0.2,
        }
    }
}

pub use llm::{LlmConfig, OllamaClient};
pub use probe::{AudioProber, MediaProbe};
pub use retry::RetryPolicy;
pub use whisper::{InferenceDevice, WhisperClient, WhisperConfig};
