//! Publication of one analysis result to inline comments, the summary
//! comment and the check run.
//!
//! Each channel fails independently. Only the summary channel can fail the
//! run; inline comments and the check run are best-effort.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use diffdragon_core::analysis::commentable_lines;
use diffdragon_core::policy::CommentPolicy;
use diffdragon_core::{AnalysisResult, ChangedFile, InlineComment};
use tracing::{info, warn};

use crate::host::{
    CheckRunAnnotation, CheckRunConclusion, CheckRunId, CheckRunUpdate, CommentId,
    PullRequestHost, RepoRef, MAX_ANNOTATIONS_PER_REQUEST,
};

/// The pull request and commit a review is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewTarget {
    pub repo: RepoRef,
    pub pr_number: u64,
    pub head_sha: String,
}

impl ReviewTarget {
    pub fn short_sha(&self) -> &str {
        short_sha(&self.head_sha)
    }
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Progress comment and check run created for one run, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressArtifacts {
    pub placeholder: Option<CommentId>,
    pub check_run: Option<CheckRunId>,
}

/// What the inline channel managed to post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InlineOutcome {
    pub posted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub inline: InlineOutcome,
    pub summary_comment: Option<CommentId>,
}

/// Drop comments that cannot be anchored: the path is not among `files`, or
/// the line is not an added or context line of that file's patch. Order is
/// preserved.
pub fn validate_inline_comments(
    comments: &[InlineComment],
    files: &[ChangedFile],
) -> Vec<InlineComment> {
    let anchors: HashMap<&str, BTreeSet<u64>> = files
        .iter()
        .filter_map(|f| {
            f.patch
                .as_deref()
                .map(|p| (f.filename.as_str(), commentable_lines(p)))
        })
        .collect();

    comments
        .iter()
        .filter(|comment| match anchors.get(comment.path.as_str()) {
            Some(lines) if lines.contains(&comment.line) => true,
            Some(_) => {
                warn!(
                    "Dropping inline comment on {}:{}: line is not part of the diff",
                    comment.path, comment.line
                );
                false
            }
            None => {
                warn!(
                    "Dropping inline comment on {}:{}: file has no reviewable diff",
                    comment.path, comment.line
                );
                false
            }
        })
        .cloned()
        .collect()
}

/// The inline comments to post, in the engine's order: validated, then
/// truncated to the policy's maximum. Empty when inline comments are off.
pub fn select_inline_comments(
    comments: &[InlineComment],
    files: &[ChangedFile],
    policy: &CommentPolicy,
) -> Vec<InlineComment> {
    if !policy.inline {
        return Vec::new();
    }

    let mut selected = validate_inline_comments(comments, files);
    if selected.len() > policy.max_inline_comments {
        info!(
            "Truncating {} inline comments to the configured maximum of {}",
            selected.len(),
            policy.max_inline_comments
        );
        selected.truncate(policy.max_inline_comments);
    }
    selected
}

/// The comments the check run annotates: every anchored comment, before
/// truncation. Empty when inline comments are off.
pub fn annotated_comments(
    comments: &[InlineComment],
    files: &[ChangedFile],
    policy: &CommentPolicy,
) -> Vec<InlineComment> {
    if !policy.inline {
        return Vec::new();
    }
    validate_inline_comments(comments, files)
}

/// Post `comments` one at a time. A failed post is logged and skipped.
pub async fn post_inline_comments(
    host: &dyn PullRequestHost,
    target: &ReviewTarget,
    comments: &[InlineComment],
) -> InlineOutcome {
    let mut outcome = InlineOutcome::default();

    for comment in comments {
        match host
            .create_review_comment(&target.repo, target.pr_number, &target.head_sha, comment)
            .await
        {
            Ok(()) => outcome.posted += 1,
            Err(e) => {
                outcome.failed += 1;
                warn!(
                    "Failed to post inline comment on {}:{}: {:#}",
                    comment.path, comment.line, e
                );
            }
        }
    }

    info!(
        "Posted {} of {} inline comments on {} #{}",
        outcome.posted,
        comments.len(),
        target.repo,
        target.pr_number
    );
    outcome
}

/// Replace the placeholder with `body`, or post `body` as a new comment if
/// there is no placeholder.
pub async fn publish_summary(
    host: &dyn PullRequestHost,
    target: &ReviewTarget,
    placeholder: Option<CommentId>,
    body: &str,
) -> Result<CommentId> {
    match placeholder {
        Some(comment_id) => {
            host.update_issue_comment(&target.repo, comment_id, body)
                .await
                .context("Failed to finalize summary comment")?;
            Ok(comment_id)
        }
        None => host
            .create_issue_comment(&target.repo, target.pr_number, body)
            .await
            .context("Failed to post summary comment"),
    }
}

/// Best-effort update of a check run; a failure is only logged.
pub async fn update_check_run_best_effort(
    host: &dyn PullRequestHost,
    target: &ReviewTarget,
    check_run: Option<CheckRunId>,
    update: &CheckRunUpdate,
) {
    let Some(check_run_id) = check_run else {
        return;
    };

    if let Err(e) = host
        .update_check_run(&target.repo, check_run_id, update)
        .await
    {
        warn!(
            "Failed to update check run {} for {}: {:#}",
            check_run_id.0,
            target.short_sha(),
            e
        );
    }
}

/// Best-effort update of a progress comment; a failure is only logged.
pub async fn update_comment_best_effort(
    host: &dyn PullRequestHost,
    target: &ReviewTarget,
    comment: Option<CommentId>,
    body: &str,
) {
    let Some(comment_id) = comment else {
        return;
    };

    if let Err(e) = host
        .update_issue_comment(&target.repo, comment_id, body)
        .await
    {
        warn!("Failed to update comment {}: {:#}", comment_id.0, e);
    }
}

pub fn success_check_run(result: &AnalysisResult, comments: &[InlineComment]) -> CheckRunUpdate {
    let annotations: Vec<CheckRunAnnotation> = comments
        .iter()
        .take(MAX_ANNOTATIONS_PER_REQUEST)
        .map(CheckRunAnnotation::from)
        .collect();

    let mut update = CheckRunUpdate::completed(
        CheckRunConclusion::Success,
        format!("Review complete: {} comment(s)", comments.len()),
        result.summary.clone(),
    );
    update.annotations = annotations;
    update
}

pub fn failure_check_run() -> CheckRunUpdate {
    CheckRunUpdate::completed(
        CheckRunConclusion::Failure,
        "Review failed",
        "The automated review could not be completed.",
    )
}

/// Fan `result` out to every enabled channel and wait for all of them.
///
/// Returns an error only if the summary could not be published.
pub async fn publish(
    host: &dyn PullRequestHost,
    target: &ReviewTarget,
    policy: &CommentPolicy,
    files: &[ChangedFile],
    result: &AnalysisResult,
    artifacts: ProgressArtifacts,
    version: &str,
) -> Result<PublishOutcome> {
    let anchored = annotated_comments(&result.inline_comments, files, policy);
    let to_post = select_inline_comments(&result.inline_comments, files, policy);
    let summary_body = render_summary(result, target, version);
    let check_run_update = success_check_run(result, &anchored);

    let inline = post_inline_comments(host, target, &to_post);
    let summary = async {
        if policy.summary {
            publish_summary(host, target, artifacts.placeholder, &summary_body)
                .await
                .map(Some)
        } else {
            Ok(None)
        }
    };
    let check =
        update_check_run_best_effort(host, target, artifacts.check_run, &check_run_update);

    let (inline, summary, ()) = tokio::join!(inline, summary, check);

    Ok(PublishOutcome {
        inline,
        summary_comment: summary?,
    })
}

/// Mark every progress artifact of a failed run. Never fails.
pub async fn report_failure(
    host: &dyn PullRequestHost,
    target: &ReviewTarget,
    artifacts: ProgressArtifacts,
    version: &str,
) {
    let notice = render_failure(target, version);
    let update = failure_check_run();
    tokio::join!(
        update_comment_best_effort(host, target, artifacts.placeholder, &notice),
        update_check_run_best_effort(host, target, artifacts.check_run, &update),
    );
}

fn footer(version: &str) -> String {
    format!("---\n_Diff Dragon v{}_", version)
}

pub fn render_progress(target: &ReviewTarget, message: &str, version: &str) -> String {
    format!(
        "⏳ **Diff Dragon is reviewing this pull request**\n\n\
        Commit: `{}`\n\
        {}\n\n\
        {}",
        target.short_sha(),
        message,
        footer(version)
    )
}

pub fn render_summary(result: &AnalysisResult, target: &ReviewTarget, version: &str) -> String {
    let summary = if result.summary.trim().is_empty() {
        "_No summary provided._".to_string()
    } else {
        result.summary.trim().to_string()
    };

    let suggestions = if result.suggestions.is_empty() {
        "_No suggestions._".to_string()
    } else {
        result
            .suggestions
            .iter()
            .map(|s| format!("- {}", s.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let release_notes = if result.release_notes.trim().is_empty() {
        "_None._".to_string()
    } else {
        result.release_notes.trim().to_string()
    };

    format!(
        "🐉 **Diff Dragon review**\n\n\
        Commit: `{}`\n\n\
        **PR Summary:**\n{}\n\n\
        **Suggestions:**\n{}\n\n\
        **Release Notes:**\n{}\n\n\
        {}",
        target.short_sha(),
        summary,
        suggestions,
        release_notes,
        footer(version)
    )
}

/// Failure notice shown to the PR author. Deliberately carries no error detail.
pub fn render_failure(target: &ReviewTarget, version: &str) -> String {
    format!(
        "❌ **Diff Dragon review failed**\n\n\
        Commit: `{}`\n\
        The review could not be completed. Push a new commit or redeliver the webhook to try again.\n\n\
        {}",
        target.short_sha(),
        footer(version)
    )
}
