use anyhow::{bail, Context, Result};
use diffdragon_core::openai::DEFAULT_MODEL;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub github_webhook_secret: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub port: u16,
    /// Directory holding the review ledger. Defaults to the working directory.
    pub state_dir: PathBuf,
    /// Per-request timeout for hosting API calls.
    pub http_timeout: Duration,
    /// Per-request timeout for the analysis call.
    pub analysis_timeout: Duration,
    pub recording_enabled: bool,
    pub recording_log_path: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("github_app_id", &self.github_app_id)
            .field("openai_model", &self.openai_model)
            .field("port", &self.port)
            .field("state_dir", &self.state_dir)
            .field("http_timeout", &self.http_timeout)
            .field("analysis_timeout", &self.analysis_timeout)
            .field("recording_enabled", &self.recording_enabled)
            .field("recording_log_path", &self.recording_log_path)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source; `from_env` passes
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_app_id = lookup("GITHUB_APP_ID")
            .context("GITHUB_APP_ID environment variable is required")?
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;

        let github_private_key = load_private_key(
            lookup("GITHUB_PRIVATE_KEY"),
            lookup("GITHUB_PRIVATE_KEY_FILE_PATH"),
        )?;

        let github_webhook_secret = lookup("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let openai_api_key = lookup("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable is required")?;

        let openai_model = lookup("OPENAI_MODEL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = lookup("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let http_timeout = parse_secs(lookup("HTTP_TIMEOUT_SECS"), 30)
            .context("HTTP_TIMEOUT_SECS must be a whole number of seconds")?;

        let analysis_timeout = parse_secs(lookup("ANALYSIS_TIMEOUT_SECS"), 300)
            .context("ANALYSIS_TIMEOUT_SECS must be a whole number of seconds")?;

        let recording_enabled = lookup("RECORDING_ENABLED")
            .unwrap_or_else(|| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let recording_log_path =
            lookup("RECORDING_LOG_PATH").unwrap_or_else(|| "recordings.jsonl".to_string());

        Ok(Config {
            github_app_id,
            github_private_key,
            github_webhook_secret,
            openai_api_key,
            openai_model,
            port,
            state_dir,
            http_timeout,
            analysis_timeout,
            recording_enabled,
            recording_log_path,
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("diffdragon-ledger.db")
    }
}

/// The PEM from `GITHUB_PRIVATE_KEY` (with literal `\n` unescaped), or else
/// the contents of the file at `GITHUB_PRIVATE_KEY_FILE_PATH`.
fn load_private_key(inline: Option<String>, file_path: Option<String>) -> Result<String> {
    if let Some(key) = inline.filter(|s| !s.trim().is_empty()) {
        return Ok(key.replace("\\n", "\n"));
    }

    match file_path.filter(|s| !s.trim().is_empty()) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read GitHub private key from {}", path)),
        None => bail!("GITHUB_PRIVATE_KEY or GITHUB_PRIVATE_KEY_FILE_PATH must be set"),
    }
}

fn parse_secs(value: Option<String>, default: u64) -> Result<Duration> {
    let secs = match value {
        Some(raw) => raw.trim().parse::<u64>()?,
        None => default,
    };
    Ok(Duration::from_secs(secs))
}
