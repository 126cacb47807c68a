//! The review lifecycle for one webhook delivery.
//!
//! ```text
//! RECEIVED -> VERIFIED -> DEDUPED -> CONFIGURED -> FILTERED -> SKIPPED
//!                                                     |
//!                                                     v
//!                                                ANALYZING -> PUBLISHING -> COMPLETED
//!                                                     |             |
//!                                                     +-----> FAILED <+
//! ```
//!
//! Every delivery runs this sequence on its own; the ledger is the only
//! state shared between deliveries.

mod event;


pub use event::{parse_delivery, GitHubWebhookPayload, InboundEvent, ParsedDelivery};

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use diffdragon_core::policy::{self, FileFilter, Policy, POLICY_PATHS};
use diffdragon_core::{signature, ChangedFile, CorrelationId, ReviewAnalyzer};
use tracing::{error, info, warn};

use crate::host::{CheckRunUpdate, HostConnector, PullRequestHost, RepoRef};
use crate::ledger::{LedgerError, ReviewLedger};
use crate::publish::{
    self, render_progress, update_comment_best_effort, ProgressArtifacts, ReviewTarget,
};

/// Terminal outcome of a delivery that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Ok,
    /// Not a pull-request event.
    Ignored,
    /// Reviews disabled, or the action is not configured to trigger one.
    Disabled,
    InvalidSignature,
    AlreadyReviewed,
    NoFilesToReview,
    MissingInstallation,
    MalformedPayload,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Ignored => "ignored",
            Self::Disabled => "ignored - disabled or action not in reviewOn list",
            Self::InvalidSignature => "invalid signature",
            Self::AlreadyReviewed => "already reviewed",
            Self::NoFilesToReview => "no files to review after filtering",
            Self::MissingInstallation => "error - no installation id",
            Self::MalformedPayload => "ignored - malformed payload",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStage {
    Received,
    Verified,
    Deduped,
    Configured,
    Filtered,
    Skipped,
    Analyzing,
    Publishing,
    Completed,
    Failed,
}

impl ReviewStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Skipped | Self::Completed | Self::Failed)
    }

    /// Whether a run may move from `self` to `next`. Skips can end the run
    /// from any pre-analysis stage.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ReviewStage::*;
        matches!(
            (self, next),
            (Received, Verified)
                | (Verified, Deduped)
                | (Deduped, Configured)
                | (Configured, Filtered)
                | (Filtered, Analyzing)
                | (Analyzing, Publishing)
                | (Publishing, Completed)
                | (Analyzing | Publishing, Failed)
                | (Received | Verified | Deduped | Configured | Filtered, Skipped)
        )
    }
}

impl fmt::Display for ReviewStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::Verified => "VERIFIED",
            Self::Deduped => "DEDUPED",
            Self::Configured => "CONFIGURED",
            Self::Filtered => "FILTERED",
            Self::Skipped => "SKIPPED",
            Self::Analyzing => "ANALYZING",
            Self::Publishing => "PUBLISHING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Transient per-delivery state, for logging and progress artifacts.
struct ReviewRun {
    stage: ReviewStage,
    label: String,
    artifacts: ProgressArtifacts,
}

impl ReviewRun {
    fn new(correlation_id: Option<&CorrelationId>) -> Self {
        Self {
            stage: ReviewStage::Received,
            label: correlation_id
                .map(|id| format!("delivery {}", id))
                .unwrap_or_else(|| "delivery".to_string()),
            artifacts: ProgressArtifacts::default(),
        }
    }

    fn advance(&mut self, next: ReviewStage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "invalid review transition {} -> {}",
            self.stage,
            next
        );
        info!("{}: {} -> {}", self.label, self.stage, next);
        self.stage = next;
    }

    fn skip(&mut self, status: ReviewStatus) -> ReviewStatus {
        self.advance(ReviewStage::Skipped);
        info!("{}: finished with status '{}'", self.label, status);
        status
    }
}

/// Orchestrates one review per delivery.
pub struct ReviewPipeline {
    connector: Arc<dyn HostConnector>,
    analyzer: Arc<dyn ReviewAnalyzer>,
    ledger: Arc<dyn ReviewLedger>,
    webhook_secret: String,
    version: String,
}

impl ReviewPipeline {
    pub fn new(
        connector: Arc<dyn HostConnector>,
        analyzer: Arc<dyn ReviewAnalyzer>,
        ledger: Arc<dyn ReviewLedger>,
        webhook_secret: String,
        version: String,
    ) -> Self {
        Self {
            connector,
            analyzer,
            ledger,
            webhook_secret,
            version,
        }
    }

    /// Whether `signature_header` authenticates `raw_body` under this
    /// pipeline's webhook secret.
    pub fn is_authentic(&self, raw_body: &[u8], signature_header: Option<&str>) -> bool {
        signature::verify(raw_body, signature_header, &self.webhook_secret)
    }

    /// Run one delivery to completion.
    ///
    /// Skips are `Ok` with a non-`Ok` status. An `Err` means analysis or
    /// summary publication failed after failure notices were attempted; no
    /// ledger record is written, so a redelivery will try again.
    pub async fn handle_delivery(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<ReviewStatus> {
        let mut run = ReviewRun::new(correlation_id.as_ref());

        if !self.is_authentic(raw_body, signature_header) {
            warn!("{}: invalid webhook signature", run.label);
            return Ok(run.skip(ReviewStatus::InvalidSignature));
        }
        run.advance(ReviewStage::Verified);

        let event = match parse_delivery(raw_body) {
            ParsedDelivery::Event(event) => event,
            ParsedDelivery::NotPullRequest => return Ok(run.skip(ReviewStatus::Ignored)),
            ParsedDelivery::MissingInstallation => {
                warn!("{}: pull request event without installation id", run.label);
                return Ok(run.skip(ReviewStatus::MissingInstallation));
            }
            ParsedDelivery::Malformed(reason) => {
                warn!("{}: malformed payload: {}", run.label, reason);
                return Ok(run.skip(ReviewStatus::MalformedPayload));
            }
        };
        run.label = format!(
            "{} #{} @{}",
            event.repo,
            event.pr_number,
            publish::short_sha(&event.head_sha)
        );
        info!("{}: received '{}' event", run.label, event.action);

        let key = event.ledger_key();
        match self.ledger.has(&key).await {
            Ok(true) => return Ok(run.skip(ReviewStatus::AlreadyReviewed)),
            Ok(false) => {}
            Err(e) => {
                // The unique key on record() still prevents a duplicate record.
                warn!("{}: ledger lookup failed, continuing: {}", run.label, e);
            }
        }
        run.advance(ReviewStage::Deduped);

        let host = self
            .connector
            .connect(event.installation_id, correlation_id)
            .await
            .context("Failed to authenticate as installation")?;

        let policy = load_policy(host.as_ref(), &event.repo).await;
        run.advance(ReviewStage::Configured);

        if !policy::should_review(&policy, &event.action) {
            return Ok(run.skip(ReviewStatus::Disabled));
        }

        let all_files = host
            .list_pull_request_files(&event.repo, event.pr_number)
            .await
            .context("Failed to list pull request files")?;
        let files = filter_files(&policy, all_files);
        run.advance(ReviewStage::Filtered);

        if files.is_empty() {
            return Ok(run.skip(ReviewStatus::NoFilesToReview));
        }
        info!("{}: {} files to review", run.label, files.len());

        let target = event.target();
        run.advance(ReviewStage::Analyzing);
        run.artifacts = self
            .create_progress_artifacts(host.as_ref(), &target, &policy, files.len())
            .await;

        if let Err(e) = self
            .analyze_and_publish(&mut run, host.as_ref(), &target, &policy, &files)
            .await
        {
            error!("{}: review failed: {:#}", run.label, e);
            publish::report_failure(host.as_ref(), &target, run.artifacts, &self.version).await;
            run.advance(ReviewStage::Failed);
            return Err(e);
        }

        let status = match self.ledger.record(&key, event.installation_id).await {
            Ok(()) => ReviewStatus::Ok,
            Err(LedgerError::AlreadyRecorded(_)) => {
                warn!(
                    "{}: a concurrent delivery recorded this review first",
                    run.label
                );
                ReviewStatus::AlreadyReviewed
            }
            Err(e) => {
                error!("{}: failed to record review: {}", run.label, e);
                ReviewStatus::Ok
            }
        };
        run.advance(ReviewStage::Completed);
        info!("{}: finished with status '{}'", run.label, status);
        Ok(status)
    }

    /// Placeholder comment (when the summary channel is on) and check run.
    /// Either may be missing; neither failure stops the review.
    async fn create_progress_artifacts(
        &self,
        host: &dyn PullRequestHost,
        target: &ReviewTarget,
        policy: &Policy,
        file_count: usize,
    ) -> ProgressArtifacts {
        let message = format!("Queued review of {} file(s)...", file_count);

        let placeholder = async {
            if !policy.comments.summary {
                return None;
            }
            let body = render_progress(target, &message, &self.version);
            match host
                .create_issue_comment(&target.repo, target.pr_number, &body)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        "Failed to create progress comment, the summary will be posted fresh: {:#}",
                        e
                    );
                    None
                }
            }
        };

        let check_run = async {
            let update = CheckRunUpdate::in_progress("Reviewing", message.clone());
            match host
                .create_check_run(&target.repo, &target.head_sha, &update)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        "Failed to create check run for {} (continuing with review): {:#}",
                        target.short_sha(),
                        e
                    );
                    None
                }
            }
        };

        let (placeholder, check_run) = tokio::join!(placeholder, check_run);
        ProgressArtifacts {
            placeholder,
            check_run,
        }
    }

    async fn analyze_and_publish(
        &self,
        run: &mut ReviewRun,
        host: &dyn PullRequestHost,
        target: &ReviewTarget,
        policy: &Policy,
        files: &[ChangedFile],
    ) -> Result<()> {
        let progress = |message: String| render_progress(target, &message, &self.version);

        update_comment_best_effort(
            host,
            target,
            run.artifacts.placeholder,
            &progress(format!("Analyzing {} file(s)...", files.len())),
        )
        .await;

        let result = self
            .analyzer
            .analyze(files, policy)
            .await
            .context("Analysis failed")?;
        info!(
            "{}: analysis produced {} inline comment(s)",
            run.label,
            result.inline_comments.len()
        );

        run.advance(ReviewStage::Publishing);
        update_comment_best_effort(
            host,
            target,
            run.artifacts.placeholder,
            &progress("Publishing review...".to_string()),
        )
        .await;

        let outcome = publish::publish(
            host,
            target,
            &policy.comments,
            files,
            &result,
            run.artifacts,
            &self.version,
        )
        .await?;

        info!(
            "{}: published ({} inline posted, {} failed)",
            run.label, outcome.inline.posted, outcome.inline.failed
        );
        Ok(())
    }
}

/// The repository's policy, or the default if none can be read.
pub async fn load_policy(host: &dyn PullRequestHost, repo: &RepoRef) -> Policy {
    for path in POLICY_PATHS {
        match host.get_file_content(repo, path).await {
            Ok(Some(raw)) => {
                info!("Loaded policy from {} in {}", path, repo);
                return policy::parse(&raw);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to read {} from {}: {:#}", path, repo, e);
            }
        }
    }

    info!("No policy file in {}, using defaults", repo);
    Policy::default()
}

pub fn filter_files(policy: &Policy, files: Vec<ChangedFile>) -> Vec<ChangedFile> {
    let filter = FileFilter::new(policy);
    let total = files.len();
    let kept: Vec<ChangedFile> = files
        .into_iter()
        .filter(|f| filter.should_review(&f.filename))
        .collect();

    info!("{} of {} changed files pass the policy filter", kept.len(), total);
    kept
}
