//! Configuration: compiled defaults, overlaid by an optional TOML file,
//! overlaid by environment variables.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use gijiroku_backends::InferenceDevice;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_KEYS: &[&str] = &[
    "BIND_ADDR",
    "DATA_DIR",
    "UPLOAD_DIR",
    "WHISPER_MODEL",
    "WHISPER_DEVICE",
    "WHISPER_MODEL_DIR",
    "WHISPER_LANGUAGE",
    "OLLAMA_BASE_URL",
    "OLLAMA_MODEL",
    "MAX_FILE_SIZE_BYTES",
    "WORKER_COUNT",
    "FILE_RETENTION_DAYS",
    "TRANSCRIBE_TIMEOUT_SECS",
    "CORRECT_TIMEOUT_SECS",
    "SUMMARIZE_TIMEOUT_SECS",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub whisper_model: String,
    pub whisper_device: InferenceDevice,
    /// Defaults to `{data_dir}/models` when unset.
    pub whisper_model_dir: Option<PathBuf>,
    pub whisper_language: Option<String>,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub max_file_size_bytes: u64,
    pub worker_count: usize,
    pub file_retention_days: u32,
    pub transcribe_timeout_secs: u64,
    pub correct_timeout_secs: u64,
    pub summarize_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            data_dir: PathBuf::from("./data"),
            upload_dir: PathBuf::from("./uploads"),
            whisper_model: "large-v3-turbo".to_string(),
            whisper_device: InferenceDevice::Cpu,
            whisper_model_dir: None,
            whisper_language: Some("ja".to_string()),
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "gemma-2-2b-jpn-it".to_string(),
            max_file_size_bytes: 52_428_800,
            worker_count: 1,
            file_retention_days: 7,
            transcribe_timeout_secs: 900,
            correct_timeout_secs: 120,
            summarize_timeout_secs: 300,
        }
    }
}

impl Config {
    pub fn load(config_file: Option<&Path>) -> Result<Self, figment::Error> {
        let toml_path = config_file.unwrap_or_else(|| Path::new("gijiroku.toml"));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(toml_path))
            .merge(Env::raw().only(ENV_KEYS))
            .extract()
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("gijiroku.db")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.whisper_model_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None)?;
            assert_eq!(config.bind_addr, "127.0.0.1:8000");
            assert_eq!(config.whisper_model, "large-v3-turbo");
            assert_eq!(config.whisper_device, InferenceDevice::Cpu);
            assert_eq!(config.max_file_size_bytes, 52_428_800);
            assert_eq!(config.worker_count, 1);
            assert_eq!(config.file_retention_days, 7);
            assert_eq!(config.model_dir(), PathBuf::from("./data/models"));
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("WHISPER_MODEL", "base");
            jail.set_env("WHISPER_DEVICE", "gpu");
            jail.set_env("OLLAMA_BASE_URL", "http://10.0.0.5:11434");
            jail.set_env("MAX_FILE_SIZE_BYTES", "1048576");
            jail.set_env("WORKER_COUNT", "3");
            let config = Config::load(None)?;
            assert_eq!(config.whisper_model, "base");
            assert_eq!(config.whisper_device, InferenceDevice::Gpu);
            assert_eq!(config.ollama_base_url, "http://10.0.0.5:11434");
            assert_eq!(config.max_file_size_bytes, 1_048_576);
            assert_eq!(config.worker_count, 3);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_sits_between_defaults_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "gijiroku.toml",
                r#"
                worker_count = 2
                ollama_model = "llama3"
                "#,
            )?;
            jail.set_env("WORKER_COUNT", "4");
            let config = Config::load(None)?;
            assert_eq!(config.worker_count, 4, "env beats file");
            assert_eq!(config.ollama_model, "llama3", "file beats defaults");
            Ok(())
        });
    }
}
