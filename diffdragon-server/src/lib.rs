pub mod config;
pub mod github;
pub mod host;
pub mod ledger;
pub mod pipeline;
pub mod publish;
pub mod webhook;

use std::sync::Arc;

pub use diffdragon_core::RecordingLogger;
pub use github::GitHubClient;
pub use host::{HostConnector, PullRequestHost, RepoRef};
pub use ledger::{InMemoryLedger, LedgerError, ReviewKey, ReviewLedger, SqliteLedger};
pub use pipeline::{ReviewPipeline, ReviewStage, ReviewStatus};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.get(..8).unwrap_or(hash).to_string()
}

pub fn get_bot_version() -> String {
    // Hash passed in by packaged builds first, then git detection at build time.
    if let Some(git_hash) = option_env!("DIFFDRAGON_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        "unknown".to_string()
    }
}

pub struct AppState {
    pub pipeline: Arc<ReviewPipeline>,
    pub recording_logger: Option<RecordingLogger>,
}
