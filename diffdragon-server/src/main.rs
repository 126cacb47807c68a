use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use diffdragon_core::OpenAiAnalyzer;
use diffdragon_server::config::Config;
use diffdragon_server::webhook::router;
use diffdragon_server::{AppState, GitHubClient, RecordingLogger, ReviewPipeline, SqliteLedger};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let version = diffdragon_server::get_bot_version();
    info!("Starting Diff Dragon {}", version);

    let config = Config::from_env().context("Failed to load configuration")?;

    let recording_logger = if config.recording_enabled {
        info!(
            "Recording enabled, logging to: {}",
            config.recording_log_path
        );
        Some(RecordingLogger::new(PathBuf::from(
            &config.recording_log_path,
        )))
    } else {
        None
    };

    let github_client = GitHubClient::new(
        config.github_app_id,
        config.github_private_key.clone(),
        config.http_timeout,
        recording_logger.clone(),
    )?;
    github_client
        .check_credentials()
        .context("GitHub App private key is unusable")?;

    let analyzer = OpenAiAnalyzer::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
        config.analysis_timeout,
        recording_logger.clone(),
    )?;
    info!("Using model {}", config.openai_model);

    let ledger_path = config.ledger_path();
    info!("Using review ledger: {}", ledger_path.display());
    let ledger = SqliteLedger::new(&ledger_path).context("Failed to open review ledger")?;

    let pipeline = ReviewPipeline::new(
        Arc::new(github_client),
        Arc::new(analyzer),
        Arc::new(ledger),
        config.github_webhook_secret.clone(),
        version,
    );

    let app = router(Arc::new(AppState {
        pipeline: Arc::new(pipeline),
        recording_logger,
    }));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
