//! The hosting-platform seam used by the review pipeline.
//!
//! [`HostConnector`] mints one authenticated [`PullRequestHost`] per delivery;
//! the pipeline passes that value explicitly and never stores it on shared state.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use diffdragon_core::{ChangedFile, CorrelationId, InlineComment};
use serde::{Deserialize, Serialize};

/// GitHub rejects check-run updates carrying more annotations than this.
pub const MAX_ANNOTATIONS_PER_REQUEST: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub u64);

impl From<u64> for CommentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRunId(pub u64);

impl From<u64> for CheckRunId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunAnnotation {
    pub path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub annotation_level: AnnotationLevel,
    pub message: String,
}

impl From<&InlineComment> for CheckRunAnnotation {
    fn from(comment: &InlineComment) -> Self {
        Self {
            path: comment.path.clone(),
            start_line: comment.line,
            end_line: comment.line,
            annotation_level: AnnotationLevel::Notice,
            message: comment.body.clone(),
        }
    }
}

/// The mutable part of a check run: what both create and update send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRunUpdate {
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckRunConclusion>,
    pub title: String,
    pub summary: String,
    pub text: Option<String>,
    pub annotations: Vec<CheckRunAnnotation>,
}

impl CheckRunUpdate {
    pub fn in_progress(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            status: CheckRunStatus::InProgress,
            conclusion: None,
            title: title.into(),
            summary: summary.into(),
            text: None,
            annotations: Vec::new(),
        }
    }

    pub fn completed(
        conclusion: CheckRunConclusion,
        title: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            status: CheckRunStatus::Completed,
            conclusion: Some(conclusion),
            title: title.into(),
            summary: summary.into(),
            text: None,
            annotations: Vec::new(),
        }
    }
}

/// Hosting-API operations the pipeline consumes, bound to one installation.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    async fn list_pull_request_files(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<ChangedFile>>;

    /// Contents of `path` on the default branch; `Ok(None)` if it does not exist.
    async fn get_file_content(&self, repo: &RepoRef, path: &str) -> Result<Option<String>>;

    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        body: &str,
    ) -> Result<CommentId>;

    async fn update_issue_comment(
        &self,
        repo: &RepoRef,
        comment_id: CommentId,
        body: &str,
    ) -> Result<()>;

    async fn create_review_comment(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        commit_sha: &str,
        comment: &InlineComment,
    ) -> Result<()>;

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        head_sha: &str,
        update: &CheckRunUpdate,
    ) -> Result<CheckRunId>;

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        check_run_id: CheckRunId,
        update: &CheckRunUpdate,
    ) -> Result<()>;
}

/// Authenticates as an installation, yielding a client scoped to one delivery.
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(
        &self,
        installation_id: u64,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Box<dyn PullRequestHost>>;
}
