//! In-process Whisper inference via whisper.cpp bindings.
//!
//! The model is loaded lazily on the first transcription and reused
//! afterwards; loading is serialized by the context slot's mutex, so
//! concurrent first-callers wait for one load. Inference itself is guarded
//! by an owned mutex moved into the blocking task, which keeps at most one
//! inference in flight per process even when a caller times out and walks
//! away.

use crate::SpeechBackend;
use async_trait::async_trait;
use gijiroku_common::{AppError, Result};
use gijiroku_protocol::{TranscriptSegment, Transcription};
use hound::SampleFormat;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Reported for every raw transcript; whisper.cpp exposes no single
/// per-inference figure, so this is a fixed passthrough value.
const TRANSCRIPT_CONFIDENCE: f64 = 0.9;

const WHISPER_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceDevice {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Model identifier, e.g. `large-v3-turbo`; resolves to
    /// `ggml-{id}.bin` under `model_dir`.
    pub model: String,
    pub model_dir: PathBuf,
    pub device: InferenceDevice,
    /// Transcription language; `None` lets the model auto-detect.
    pub language: Option<String>,
    pub timeout: Duration,
    /// Inference threads; 0 picks from the CPU count.
    pub threads: u32,
}

impl WhisperConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(format!("ggml-{}.bin", self.model))
    }
}

pub struct WhisperClient {
    config: WhisperConfig,
    ctx: Mutex<Option<Arc<WhisperContext>>>,
    inference: Arc<Mutex<()>>,
    load_failed: AtomicBool,
}

impl WhisperClient {
    pub fn new(config: WhisperConfig) -> Self {
        Self {
            config,
            ctx: Mutex::new(None),
            inference: Arc::new(Mutex::new(())),
            load_failed: AtomicBool::new(false),
        }
    }

    /// Lazily load (or reuse) the model context.
    async fn context(&self) -> Result<Arc<WhisperContext>> {
        let mut slot = self.ctx.lock().await;
        if let Some(ctx) = slot.as_ref() {
            return Ok(ctx.clone());
        }
        if self.load_failed.load(Ordering::Relaxed) {
            return Err(AppError::WhisperLoadFailed(
                "model previously failed to load; operator intervention required".into(),
            ));
        }

        let path = self.config.model_path();
        let Some(path_str) = path.to_str().map(str::to_string) else {
            self.load_failed.store(true, Ordering::Relaxed);
            return Err(AppError::WhisperLoadFailed(format!(
                "non-UTF-8 model path: {}",
                path.display()
            )));
        };
        if !path.is_file() {
            self.load_failed.store(true, Ordering::Relaxed);
            return Err(AppError::WhisperLoadFailed(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        info!("loading whisper model from {}", path.display());
        let use_gpu = self.config.device == InferenceDevice::Gpu;
        let loaded = tokio::task::spawn_blocking(move || {
            let mut params = WhisperContextParameters::default();
            if use_gpu {
                params.use_gpu(true);
            }
            WhisperContext::new_with_params(&path_str, params)
        })
        .await
        .map_err(|e| AppError::WhisperLoadFailed(format!("load task panicked: {e}")))?;

        match loaded {
            Ok(ctx) => {
                let ctx = Arc::new(ctx);
                *slot = Some(ctx.clone());
                Ok(ctx)
            }
            Err(e) => {
                self.load_failed.store(true, Ordering::Relaxed);
                Err(AppError::WhisperLoadFailed(e.to_string()))
            }
        }
    }

    fn effective_threads(&self) -> i32 {
        if self.config.threads > 0 {
            self.config.threads as i32
        } else {
            num_cpus::get().min(8) as i32
        }
    }
}

#[async_trait]
impl SpeechBackend for WhisperClient {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Transcription> {
        let ctx = self.context().await?;
        let samples = load_samples(audio_path).await?;
        if samples.is_empty() {
            return Err(AppError::CorruptFile("no audio samples decoded".into()));
        }

        let lang = language
            .map(str::to_string)
            .or_else(|| self.config.language.clone())
            .unwrap_or_else(|| "auto".to_string());
        let threads = self.effective_threads();
        let model = self.config.model.clone();
        let reported_language = lang.clone();

        // The guard travels into the blocking task: a caller that times out
        // cannot start a second inference while the first is still running.
        let guard = self.inference.clone().lock_owned().await;
        let work = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            run_inference(&ctx, &samples, &lang, threads)
        });

        match tokio::time::timeout(self.config.timeout, work).await {
            Err(_) => {
                warn!("whisper inference exceeded {:?}", self.config.timeout);
                Err(AppError::WhisperTimeout(self.config.timeout))
            }
            Ok(Err(join_err)) => Err(AppError::WhisperInferenceFailed(format!(
                "inference task panicked: {join_err}"
            ))),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok((text, segments)))) => Ok(Transcription {
                text,
                segments,
                language: reported_language,
                confidence: TRANSCRIPT_CONFIDENCE,
                model,
            }),
        }
    }

    fn is_degraded(&self) -> bool {
        self.load_failed.load(Ordering::Relaxed)
    }
}

fn run_inference(
    ctx: &WhisperContext,
    samples: &[f32],
    language: &str,
    threads: i32,
) -> Result<(String, Vec<TranscriptSegment>)> {
    let mut state = ctx
        .create_state()
        .map_err(|e| AppError::WhisperInferenceFailed(format!("create state: {e}")))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(Some(language));
    params.set_translate(false);
    params.set_n_threads(threads);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    state
        .full(params, samples)
        .map_err(|e| AppError::WhisperInferenceFailed(format!("inference: {e}")))?;

    let num_segments = state
        .full_n_segments()
        .map_err(|e| AppError::WhisperInferenceFailed(format!("segment count: {e}")))?;

    let mut text = String::new();
    let mut segments = Vec::with_capacity(num_segments as usize);
    for i in 0..num_segments {
        let segment_text = state
            .full_get_segment_text(i)
            .map_err(|e| AppError::WhisperInferenceFailed(format!("segment {i} text: {e}")))?;
        let t0 = state
            .full_get_segment_t0(i)
            .map_err(|e| AppError::WhisperInferenceFailed(format!("segment {i} start: {e}")))?;
        let t1 = state
            .full_get_segment_t1(i)
            .map_err(|e| AppError::WhisperInferenceFailed(format!("segment {i} end: {e}")))?;

        text.push_str(&segment_text);
        // Timestamps are reported in centiseconds.
        segments.push(TranscriptSegment {
            start_ms: t0.max(0) as u64 * 10,
            end_ms: t1.max(0) as u64 * 10,
            text: segment_text.trim().to_string(),
        });
    }

    Ok((text.trim().to_string(), segments))
}

/// Decode the stored upload into 16 kHz mono f32. WAV files already in that
/// shape are decoded directly; everything else is converted by ffmpeg.
async fn load_samples(path: &Path) -> Result<Vec<f32>> {
    let is_native_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        && wav_is_whisper_ready(path);

    if is_native_wav {
        let path = path.to_path_buf();
        return tokio::task::spawn_blocking(move || decode_wav(&path))
            .await
            .map_err(|e| AppError::WhisperInferenceFailed(format!("decode task panicked: {e}")))?;
    }

    let converted = convert_with_ffmpeg(path).await?;
    let converted_path = converted.path().to_path_buf();
    tokio::task::spawn_blocking(move || decode_wav(&converted_path))
        .await
        .map_err(|e| AppError::WhisperInferenceFailed(format!("decode task panicked: {e}")))?
}

fn wav_is_whisper_ready(path: &Path) -> bool {
    hound::WavReader::open(path)
        .map(|r| {
            let spec = r.spec();
            spec.sample_rate == WHISPER_SAMPLE_RATE && spec.channels == 1
        })
        .unwrap_or(false)
}

fn decode_wav(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| AppError::CorruptFile(format!("unreadable WAV: {e}")))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| AppError::CorruptFile(format!("bad WAV samples: {e}")))?,
        SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AppError::CorruptFile(format!("bad WAV samples: {e}")))?
        }
    };
    if spec.channels <= 1 {
        return Ok(samples);
    }
    let channels = spec.channels as usize;
    Ok(samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

async fn convert_with_ffmpeg(input: &Path) -> Result<NamedTempFile> {
    let output = NamedTempFile::with_suffix(".wav")
        .map_err(|e| AppError::WhisperInferenceFailed(format!("temp file: {e}")))?;
    let status = tokio::process::Command::new("ffmpeg")
        .arg("-i")
        .arg(input)
        .arg("-ar")
        .arg(WHISPER_SAMPLE_RATE.to_string())
        .arg("-ac")
        .arg("1")
        .arg("-c:a")
        .arg("pcm_s16le")
        .arg("-f")
        .arg("wav")
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg(output.path())
        .output()
        .await
        .map_err(|e| AppError::CorruptFile(format!("ffmpeg not runnable: {e}")))?;
    if !status.status.success() {
        let stderr = String::from_utf8_lossy(&status.stderr);
        return Err(AppError::CorruptFile(format!(
            "ffmpeg conversion failed: {}",
            stderr.trim()
        )));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::tempdir;

    fn config_with_dir(dir: &Path) -> WhisperConfig {
        WhisperConfig {
            model: "large-v3-turbo".to_string(),
            model_dir: dir.to_path_buf(),
            device: InferenceDevice::Cpu,
            language: Some("ja".to_string()),
            timeout: Duration::from_secs(900),
            threads: 0,
        }
    }

    #[test]
    fn test_model_path_resolution() {
        let config = config_with_dir(Path::new("/models"));
        assert_eq!(
            config.model_path(),
            PathBuf::from("/models/ggml-large-v3-turbo.bin")
        );
    }

    #[test]
    fn test_device_parses_from_lowercase() {
        assert_eq!(
            serde_json::from_str::<InferenceDevice>("\"cpu\"").unwrap(),
            InferenceDevice::Cpu
        );
        assert_eq!(
            serde_json::from_str::<InferenceDevice>("\"gpu\"").unwrap(),
            InferenceDevice::Gpu
        );
        assert!(serde_json::from_str::<InferenceDevice>("\"tpu\"").is_err());
    }

    #[tokio::test]
    async fn test_missing_model_fails_fast_and_degrades() {
        let dir = tempdir().unwrap();
        let client = WhisperClient::new(config_with_dir(dir.path()));
        assert!(!client.is_degraded());

        let err = client
            .transcribe(Path::new("unused.wav"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WHISPER_LOAD_FAILED");
        assert!(client.is_degraded());

        // Second call short-circuits without touching the filesystem.
        let err = client
            .transcribe(Path::new("unused.wav"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WHISPER_LOAD_FAILED");
    }

    #[test]
    fn test_decode_wav_averages_stereo_to_mono() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: WHISPER_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16_384i16).unwrap();
            writer.write_sample(-16_384i16).unwrap();
        }
        writer.finalize().unwrap();

        let samples = decode_wav(&path).unwrap();
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_wav_ready_check() {
        let dir = tempdir().unwrap();
        let ready = dir.path().join("ready.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: WHISPER_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&ready, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();
        assert!(wav_is_whisper_ready(&ready));

        let wrong_rate = dir.path().join("cd.wav");
        let spec = WavSpec {
            sample_rate: 44_100,
            ..spec
        };
        let mut writer = WavWriter::create(&wrong_rate, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();
        assert!(!wav_is_whisper_ready(&wrong_rate));
    }
}
