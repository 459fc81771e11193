//! Upload validation and persistence.
//!
//! Validation short-circuits on the first failure and nothing persists on a
//! rejected upload. Accepted files land under a content-addressed path so a
//! duplicate upload never stores a second copy of the bytes.

use gijiroku_backends::MediaProbe;
use gijiroku_common::{AppError, Result};
use gijiroku_protocol::{Job, NewJob, UsageType};
use gijiroku_store::Store;
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Logical audio formats accepted for upload. `.mp4` is treated as M4A
/// throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    M4a,
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "m4a" | "mp4" => Some(AudioFormat::M4a),
            "wav" => Some(AudioFormat::Wav),
            "mp3" => Some(AudioFormat::Mp3),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "audio/m4a" | "audio/x-m4a" | "audio/mp4" => Some(AudioFormat::M4a),
            "audio/wav" | "audio/wave" | "audio/x-wav" => Some(AudioFormat::Wav),
            "audio/mp3" | "audio/mpeg" => Some(AudioFormat::Mp3),
            _ => None,
        }
    }

    /// The canonical MIME stored on the job.
    pub fn mime(&self) -> &'static str {
        match self {
            AudioFormat::M4a => "audio/m4a",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mp3",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

/// Canonical MIME for any accepted alias, `None` for everything else.
pub fn normalize_mime(mime: &str) -> Option<&'static str> {
    AudioFormat::from_mime(mime).map(|f| f.mime())
}

/// Identify the container from magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<AudioFormat> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some(AudioFormat::Wav);
    }
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return Some(AudioFormat::M4a);
    }
    if bytes.len() >= 3 && &bytes[0..3] == b"ID3" {
        return Some(AudioFormat::Mp3);
    }
    // Bare MPEG audio frame sync (11 set bits).
    if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0 {
        return Some(AudioFormat::Mp3);
    }
    None
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub upload_dir: PathBuf,
    pub max_file_size: u64,
}

pub struct Intake {
    store: Arc<Store>,
    probe: Arc<dyn MediaProbe>,
    config: IntakeConfig,
}

impl Intake {
    pub fn new(store: Arc<Store>, probe: Arc<dyn MediaProbe>, config: IntakeConfig) -> Self {
        Self {
            store,
            probe,
            config,
        }
    }

    /// Validate and persist one upload, returning the created job. A live
    /// job with identical content and usage type is returned instead of
    /// creating a duplicate.
    pub async fn accept(
        &self,
        original_name: &str,
        bytes: Vec<u8>,
        usage_type: UsageType,
    ) -> Result<Job> {
        let size = bytes.len() as u64;
        if size == 0 {
            return Err(AppError::EmptyFile);
        }
        if size > self.config.max_file_size {
            return Err(AppError::FileTooLarge(size));
        }

        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| AppError::InvalidFormat("filename has no extension".into()))?;
        let declared = AudioFormat::from_extension(extension).ok_or_else(|| {
            AppError::InvalidFormat(format!("unsupported extension .{extension}"))
        })?;
        let sniffed = sniff_format(&bytes)
            .ok_or_else(|| AppError::InvalidFormat("unrecognized audio container".into()))?;
        if declared != sniffed {
            return Err(AppError::InvalidFormat(format!(
                "extension .{extension} does not match detected {} content",
                sniffed.mime()
            )));
        }

        let (bytes, hash) = tokio::task::spawn_blocking(move || {
            let digest = Sha256::digest(&bytes);
            (bytes, hex::encode(digest))
        })
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(e)))?;

        if let Some(existing) = self.store.find_active_by_hash(&hash, usage_type)? {
            info!(
                "dedup hit for {original_name}: live job {} shares hash {hash}",
                existing.id
            );
            return Ok(existing);
        }

        let stored_filename = format!("{hash}.{}", declared.extension());
        let path = self
            .config
            .upload_dir
            .join(&hash[..2])
            .join(&stored_filename);
        let pre_existing = path.exists();
        if !pre_existing {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &bytes).await?;
            debug!("stored upload at {}", path.display());
        }

        let props = match self.probe.probe(&path).await {
            Ok(props) => props,
            Err(e) => {
                self.discard(&path, pre_existing).await;
                return Err(e);
            }
        };

        let new_job = NewJob {
            original_filename: original_name.to_string(),
            stored_filename,
            file_size: size,
            content_hash: hash,
            mime_type: declared.mime().to_string(),
            usage_type,
        };
        match self
            .store
            .create_job(&new_job, &props, &path.to_string_lossy())
        {
            Ok(job) => {
                info!(
                    "accepted {original_name} as job {} ({}, {:.1}s)",
                    job.id,
                    job.mime_type,
                    props.duration_seconds
                );
                Ok(job)
            }
            Err(e) => {
                self.discard(&path, pre_existing).await;
                Err(e.into())
            }
        }
    }

    /// Rejections leave nothing behind, but never delete a file another job
    /// already references.
    async fn discard(&self, path: &Path, pre_existing: bool) {
        if !pre_existing {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gijiroku_protocol::AudioProps;
    use std::io::Cursor;
    use tempfile::tempdir;

    struct StubProbe {
        fail: bool,
    }

    #[async_trait]
    impl MediaProbe for StubProbe {
        async fn probe(&self, _path: &Path) -> Result<AudioProps> {
            if self.fail {
                Err(AppError::CorruptFile("stub rejection".into()))
            } else {
                Ok(AudioProps {
                    duration_seconds: 3.0,
                    sample_rate: 16_000,
                    channels: 1,
                    bitrate: None,
                })
            }
        }
    }

    fn wav_bytes(samples: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..samples {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn intake_with_limit(dir: &Path, max: u64, fail_probe: bool) -> (Intake, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let intake = Intake::new(
            store.clone(),
            Arc::new(StubProbe { fail: fail_probe }),
            IntakeConfig {
                upload_dir: dir.to_path_buf(),
                max_file_size: max,
            },
        );
        (intake, store)
    }

    #[tokio::test]
    async fn test_accepts_valid_wav_and_persists_file() {
        let dir = tempdir().unwrap();
        let (intake, store) = intake_with_limit(dir.path(), 50 * 1024 * 1024, false);

        let job = intake
            .accept("meeting.wav", wav_bytes(160), UsageType::Meeting)
            .await
            .unwrap();
        assert_eq!(job.mime_type, "audio/wav");
        assert_eq!(job.original_filename, "meeting.wav");

        let meta = store.get_audio_meta(job.id).unwrap().unwrap();
        assert!(Path::new(&meta.file_path).exists());
        assert!(meta.file_path.ends_with(&job.stored_filename));
    }

    #[tokio::test]
    async fn test_rejects_empty_upload() {
        let dir = tempdir().unwrap();
        let (intake, store) = intake_with_limit(dir.path(), 1024, false);
        let err = intake
            .accept("silent.wav", Vec::new(), UsageType::Meeting)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EMPTY_FILE");
        assert_eq!(store.count_jobs().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_size_limit_is_inclusive() {
        let dir = tempdir().unwrap();
        let bytes = wav_bytes(160);
        let limit = bytes.len() as u64;
        let (intake, _) = intake_with_limit(dir.path(), limit, false);
        assert!(
            intake
                .accept("exact.wav", bytes.clone(), UsageType::Meeting)
                .await
                .is_ok(),
            "a file of exactly the limit is accepted"
        );

        let (intake, store) = intake_with_limit(dir.path(), limit - 1, false);
        let err = intake
            .accept("over.wav", bytes, UsageType::Meeting)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_TOO_LARGE");
        assert_eq!(store.count_jobs().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_extension_content_mismatch() {
        let dir = tempdir().unwrap();
        let (intake, _) = intake_with_limit(dir.path(), 1 << 20, false);
        let err = intake
            .accept("mislabeled.mp3", wav_bytes(160), UsageType::Meeting)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn test_rejects_unknown_extension_and_container() {
        let dir = tempdir().unwrap();
        let (intake, _) = intake_with_limit(dir.path(), 1 << 20, false);

        let err = intake
            .accept("notes.ogg", wav_bytes(160), UsageType::Meeting)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_FORMAT");

        let err = intake
            .accept("noise.wav", vec![0u8; 64], UsageType::Meeting)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn test_probe_failure_removes_stored_file() {
        let dir = tempdir().unwrap();
        let (intake, store) = intake_with_limit(dir.path(), 1 << 20, true);
        let err = intake
            .accept("broken.wav", wav_bytes(160), UsageType::Meeting)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CORRUPT_FILE");
        assert_eq!(store.count_jobs().unwrap(), 0);

        // Nothing persisted under the upload dir.
        let leftovers: Vec<_> = walk(dir.path());
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_duplicate_live_upload_returns_same_job() {
        let dir = tempdir().unwrap();
        let (intake, store) = intake_with_limit(dir.path(), 1 << 20, false);
        let bytes = wav_bytes(160);

        let first = intake
            .accept("weekly.wav", bytes.clone(), UsageType::Meeting)
            .await
            .unwrap();
        let second = intake
            .accept("weekly-again.wav", bytes.clone(), UsageType::Meeting)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.count_jobs().unwrap(), 1);

        // A different usage type is not a duplicate.
        let third = intake
            .accept("weekly.wav", bytes, UsageType::Interview)
            .await
            .unwrap();
        assert_ne!(first.id, third.id);
        assert_eq!(store.count_jobs().unwrap(), 2);
    }

    #[test]
    fn test_mime_normalization_round_trip() {
        let cases = [
            ("audio/x-m4a", "audio/m4a"),
            ("audio/mp4", "audio/m4a"),
            ("audio/wave", "audio/wav"),
            ("audio/x-wav", "audio/wav"),
            ("audio/mpeg", "audio/mp3"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_mime(input), Some(expected), "input {input}");
        }
        assert_eq!(normalize_mime("audio/ogg"), None);
        assert_eq!(normalize_mime("video/mp4"), None);
    }

    #[test]
    fn test_sniffing_magic_bytes() {
        assert_eq!(sniff_format(&wav_bytes(10)), Some(AudioFormat::Wav));

        let mut m4a = vec![0u8, 0, 0, 32];
        m4a.extend_from_slice(b"ftypM4A ");
        m4a.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff_format(&m4a), Some(AudioFormat::M4a));

        let mut id3 = b"ID3".to_vec();
        id3.extend_from_slice(&[0u8; 16]);
        assert_eq!(sniff_format(&id3), Some(AudioFormat::Mp3));
        assert_eq!(sniff_format(&[0xFF, 0xFB, 0x90, 0x00]), Some(AudioFormat::Mp3));

        assert_eq!(sniff_format(b"OggS junk here"), None);
    }

    fn walk(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            if let Ok(entries) = std::fs::read_dir(&current) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                    } else {
                        files.push(path);
                    }
                }
            }
        }
        files
    }
}
