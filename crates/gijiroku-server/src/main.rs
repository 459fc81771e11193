mod config;
mod error;
mod files;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use gijiroku_backends::{
    AudioProber, ChatBackend, LlmConfig, OllamaClient, SpeechBackend, WhisperClient, WhisperConfig,
};
use gijiroku_engine::{Engine, EngineConfig, Intake, IntakeConfig};
use gijiroku_store::Store;
use log::{info, warn};
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "gijiroku-server", about = "Audio transcription and meeting-minutes service")]
struct Args {
    /// Path to a TOML config file (defaults to ./gijiroku.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    std::fs::create_dir_all(&config.data_dir).context("create data dir")?;
    std::fs::create_dir_all(&config.upload_dir).context("create upload dir")?;

    let store = Arc::new(Store::open(&config.db_path()).context("open store")?);

    let speech: Arc<dyn SpeechBackend> = Arc::new(WhisperClient::new(WhisperConfig {
        model: config.whisper_model.clone(),
        model_dir: config.model_dir(),
        device: config.whisper_device,
        language: config.whisper_language.clone(),
        timeout: Duration::from_secs(config.transcribe_timeout_secs),
        threads: 0,
    }));
    let chat: Arc<dyn ChatBackend> = Arc::new(
        OllamaClient::new(LlmConfig {
            base_url: config.ollama_base_url.clone(),
            model: config.ollama_model.clone(),
        })
        .context("build LLM client")?,
    );

    let engine = Engine::new(
        store.clone(),
        speech.clone(),
        chat.clone(),
        EngineConfig {
            worker_count: config.worker_count,
            correct_timeout: Duration::from_secs(config.correct_timeout_secs),
            summarize_timeout: Duration::from_secs(config.summarize_timeout_secs),
            language: config.whisper_language.clone(),
            ..Default::default()
        },
    );
    engine.start();

    let intake = Arc::new(Intake::new(
        store.clone(),
        Arc::new(AudioProber),
        IntakeConfig {
            upload_dir: config.upload_dir.clone(),
            max_file_size: config.max_file_size_bytes,
        },
    ));

    spawn_purge_task(store.clone(), config.file_retention_days);

    let state = AppState {
        store,
        intake,
        engine: engine.clone(),
        speech,
        chat,
        max_file_size: config.max_file_size_bytes,
    };
    let app = server::router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await
        .context("serve")?;
    Ok(())
}

/// Hourly TTL sweep; the first tick fires at startup so a long-stopped
/// instance catches up immediately.
fn spawn_purge_task(store: Arc<Store>, retention_days: u32) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
            let result = store.purge_expired(cutoff, |path| {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("purge: could not remove {path}: {e}");
                }
            });
            match result {
                Ok(0) => {}
                Ok(n) => info!("purged {n} expired job(s)"),
                Err(e) => warn!("purge sweep failed: {e}"),
            }
        }
    });
}

async fn shutdown_signal(engine: Engine) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("could not install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, stopping workers");
    engine.shutdown();
}
