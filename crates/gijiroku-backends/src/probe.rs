//! Audio metadata probing.
//!
//! WAV headers are read directly; everything else goes through `ffprobe`,
//! which is already required for decoding non-WAV uploads.

use async_trait::async_trait;
use gijiroku_common::{AppError, Result};
use gijiroku_protocol::AudioProps;
use log::debug;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<AudioProps>;
}

/// Default prober used by intake.
pub struct AudioProber;

#[async_trait]
impl MediaProbe for AudioProber {
    async fn probe(&self, path: &Path) -> Result<AudioProps> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            probe_wav(path)
        } else {
            probe_ffprobe(path).await
        }
    }
}

fn probe_wav(path: &Path) -> Result<AudioProps> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| AppError::CorruptFile(format!("unreadable WAV: {e}")))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(AppError::CorruptFile("WAV reports zero sample rate".into()));
    }
    let frames = reader.duration() as f64;
    let duration_seconds = frames / spec.sample_rate as f64;
    Ok(AudioProps {
        duration_seconds,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bitrate: Some(spec.sample_rate * spec.channels as u32 * spec.bits_per_sample as u32),
    })
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

async fn probe_ffprobe(path: &Path) -> Result<AudioProps> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(path)
        .output()
        .await
        .map_err(|e| AppError::CorruptFile(format!("ffprobe not runnable: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::CorruptFile(format!(
            "ffprobe rejected the file: {}",
            stderr.trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| AppError::CorruptFile(format!("unparseable ffprobe output: {e}")))?;
    debug!("ffprobe {}: {} streams", path.display(), parsed.streams.len());

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| AppError::CorruptFile("no audio stream found".into()))?;

    let format = parsed
        .format
        .ok_or_else(|| AppError::CorruptFile("ffprobe returned no format block".into()))?;
    let duration_seconds = format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| AppError::CorruptFile("no duration reported".into()))?;
    let sample_rate = audio
        .sample_rate
        .as_deref()
        .and_then(|r| r.parse::<u32>().ok())
        .ok_or_else(|| AppError::CorruptFile("no sample rate reported".into()))?;

    Ok(AudioProps {
        duration_seconds,
        sample_rate,
        channels: audio.channels.unwrap_or(1),
        bitrate: format.bit_rate.as_deref().and_then(|b| b.parse::<u32>().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_wav(path: &Path, seconds: u32, sample_rate: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for _ in 0..(sample_rate * seconds) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_probe_wav_reports_duration_and_rate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 2, 16_000);

        let props = AudioProber.probe(&path).await.unwrap();
        assert_eq!(props.sample_rate, 16_000);
        assert_eq!(props.channels, 1);
        assert!((props.duration_seconds - 2.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_probe_rejects_garbage_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bogus.wav");
        std::fs::write(&path, b"RIFFgarbage").unwrap();

        let err = AudioProber.probe(&path).await.unwrap_err();
        assert_eq!(err.code(), "CORRUPT_FILE");
    }

    #[test]
    fn test_ffprobe_json_shape() {
        let raw = r#"{
            "streams": [
                {"codec_type": "audio", "sample_rate": "44100", "channels": 2}
            ],
            "format": {"duration": "12.5", "bit_rate": "128000"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        let stream = &parsed.streams[0];
        assert_eq!(stream.sample_rate.as_deref(), Some("44100"));
        assert_eq!(parsed.format.unwrap().duration.as_deref(), Some("12.5"));
    }
}
