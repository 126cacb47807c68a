use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use diffdragon_core::{
    ChangedFile, CorrelationId, InlineComment, RecordingLogger, RecordingMiddleware, ServiceType,
    CORRELATION_ID_HEADER,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::host::{
    CheckRunAnnotation, CheckRunConclusion, CheckRunId, CheckRunStatus, CheckRunUpdate, CommentId,
    HostConnector, PullRequestHost, RepoRef, MAX_ANNOTATIONS_PER_REQUEST,
};

pub const CHECK_RUN_NAME: &str = "Diff Dragon";

const GITHUB_API_BASE: &str = "https://api.github.com";
const ACCEPT_HEADER: &str = "application/vnd.github+json";
const FILES_PER_PAGE: usize = 100;

/// Reuse a cached installation token only while it has this long left.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// GitHub App credentials plus a per-installation token cache.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    app_id: u64,
    private_key: String,
    api_base: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

/// A client authenticated as one installation, for the duration of one delivery.
pub struct InstallationClient {
    client: ClientWithMiddleware,
    token: String,
    api_base: String,
    correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct ReviewCommentRequest<'a> {
    body: &'a str,
    commit_id: &'a str,
    path: &'a str,
    line: u64,
    side: &'static str,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileContentsResponse {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckRunOutput<'a> {
    title: &'a str,
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "no_annotations")]
    annotations: &'a [CheckRunAnnotation],
}

fn no_annotations(annotations: &&[CheckRunAnnotation]) -> bool {
    annotations.is_empty()
}

#[derive(Debug, Serialize)]
struct CheckRunRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    head_sha: Option<&'a str>,
    status: CheckRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<CheckRunConclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
    output: CheckRunOutput<'a>,
}

impl<'a> CheckRunRequest<'a> {
    fn new(head_sha: Option<&'a str>, update: &'a CheckRunUpdate) -> Self {
        let now = Utc::now().to_rfc3339();
        let annotations = if update.annotations.len() > MAX_ANNOTATIONS_PER_REQUEST {
            &update.annotations[..MAX_ANNOTATIONS_PER_REQUEST]
        } else {
            &update.annotations[..]
        };

        Self {
            name: head_sha.map(|_| CHECK_RUN_NAME),
            head_sha,
            status: update.status,
            conclusion: update.conclusion,
            started_at: (head_sha.is_some() && update.status == CheckRunStatus::InProgress)
                .then(|| now.clone()),
            completed_at: (update.status == CheckRunStatus::Completed).then_some(now),
            output: CheckRunOutput {
                title: &update.title,
                summary: &update.summary,
                text: update.text.as_deref(),
                annotations,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckRunResponse {
    id: u64,
}

impl GitHubClient {
    pub fn new(
        app_id: u64,
        private_key: String,
        timeout: Duration,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        Ok(Self {
            client: create_github_client(timeout, recording_logger)?,
            app_id,
            private_key,
            api_base: GITHUB_API_BASE.to_string(),
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Validate the private key up front so a bad deployment fails at start-up.
    pub fn check_credentials(&self) -> Result<()> {
        self.generate_jwt().map(|_| ())
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            // Backdated for clock skew.
            iat: now - 60,
            exp: now + 600,
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn cached_token(&self, installation_id: u64) -> Option<String> {
        let cache = self.token_cache.read().await;
        let (token, expires_at) = cache.get(&installation_id)?;
        token_is_fresh(*expires_at, SystemTime::now()).then(|| token.clone())
    }

    async fn get_installation_token(
        &self,
        installation_id: u64,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<String> {
        if let Some(token) = self.cached_token(installation_id).await {
            return Ok(token);
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );

        info!(
            "Requesting new access token for installation {}",
            installation_id
        );

        let mut request_builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", ACCEPT_HEADER);
        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid.as_str());
        }

        let response = request_builder
            .send()
            .await
            .context("Failed to send installation token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub App token request failed: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub App token request failed: {} - {}",
                status,
                error_text
            ));
        }

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = chrono::DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);
        let expires_at = UNIX_EPOCH + Duration::from_secs(expires_at.timestamp().max(0) as u64);

        self.token_cache
            .write()
            .await
            .insert(installation_id, (token_response.token.clone(), expires_at));

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }
}

#[async_trait]
impl HostConnector for GitHubClient {
    async fn connect(
        &self,
        installation_id: u64,
        correlation_id: Option<CorrelationId>,
    ) -> Result<Box<dyn PullRequestHost>> {
        let token = self
            .get_installation_token(installation_id, correlation_id.as_ref())
            .await?;

        Ok(Box::new(InstallationClient {
            client: self.client.clone(),
            token,
            api_base: self.api_base.clone(),
            correlation_id,
        }))
    }
}

fn token_is_fresh(expires_at: SystemTime, now: SystemTime) -> bool {
    expires_at
        .duration_since(now)
        .map(|remaining| remaining > TOKEN_REFRESH_MARGIN)
        .unwrap_or(false)
}

impl InstallationClient {
    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", ACCEPT_HEADER)
            .header("X-GitHub-Api-Version", "2022-11-28");

        match &self.correlation_id {
            Some(cid) => builder.header(CORRELATION_ID_HEADER, cid.as_str()),
            None => builder,
        }
    }

    fn with_json_body<T: Serialize>(builder: RequestBuilder, body: &T) -> Result<RequestBuilder> {
        Ok(builder
            .body(serde_json::to_string(body)?)
            .header("Content-Type", "application/json"))
    }

    fn repo_url(&self, repo: &RepoRef, rest: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_base, repo.owner, repo.name, rest)
    }

    async fn send_checked(builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("GitHub API error ({}): {} - {}", what, status, error_text);
            return Err(anyhow!(
                "GitHub API error ({}): {} - {}",
                what,
                status,
                error_text
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl PullRequestHost for InstallationClient {
    async fn list_pull_request_files(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<ChangedFile>> {
        info!("Listing files of PR #{} in {}", pr_number, repo);

        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let url = self.repo_url(
                repo,
                &format!(
                    "pulls/{}/files?per_page={}&page={}",
                    pr_number, FILES_PER_PAGE, page
                ),
            );
            let response =
                Self::send_checked(self.request(self.client.get(&url)), "list PR files").await?;
            let batch: Vec<PullRequestFile> = response
                .json()
                .await
                .context("Failed to parse PR files response")?;

            let batch_len = batch.len();
            files.extend(
                batch
                    .into_iter()
                    .map(|f| ChangedFile::new(f.filename, f.patch)),
            );

            if batch_len < FILES_PER_PAGE {
                break;
            }
            page += 1;
        }

        info!("PR #{} in {} changes {} files", pr_number, repo, files.len());
        Ok(files)
    }

    async fn get_file_content(&self, repo: &RepoRef, path: &str) -> Result<Option<String>> {
        let mut url = url::Url::parse(&self.repo_url(repo, "contents"))
            .context("Failed to build contents URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("GitHub API base URL cannot have path segments"))?
            .extend(path.split('/'));

        let response = self
            .request(self.client.get(url.as_str()))
            .send()
            .await
            .context("Failed to send file contents request")?;

        if response.status() == StatusCode::NOT_FOUND {
            info!("{} not found in {}", path, repo);
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                "GitHub API error fetching file: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub API error fetching file: {} - {}",
                status,
                error_text
            ));
        }

        let file_response: FileContentsResponse = response
            .json()
            .await
            .context("Failed to parse file contents response")?;

        if let Some(encoding) = file_response.encoding.as_deref() {
            if encoding != "base64" {
                return Err(anyhow!("Unsupported content encoding '{}'", encoding));
            }
        }

        let decoded = general_purpose::STANDARD
            .decode(file_response.content.replace('\n', ""))
            .context("Failed to decode base64 file content")?;
        let content = String::from_utf8(decoded).context("File content is not valid UTF-8")?;
        info!("Fetched {} from {} ({} bytes)", path, repo, content.len());
        Ok(Some(content))
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        body: &str,
    ) -> Result<CommentId> {
        let url = self.repo_url(repo, &format!("issues/{}/comments", pr_number));
        info!("Posting comment to PR #{} in {}", pr_number, repo);

        let builder = Self::with_json_body(
            self.request(self.client.post(&url)),
            &CommentRequest { body },
        )?;
        let comment: CommentResponse = Self::send_checked(builder, "create comment")
            .await?
            .json()
            .await
            .context("Failed to parse comment response")?;

        info!("Successfully posted comment with ID: {}", comment.id);
        Ok(CommentId(comment.id))
    }

    async fn update_issue_comment(
        &self,
        repo: &RepoRef,
        comment_id: CommentId,
        body: &str,
    ) -> Result<()> {
        let url = self.repo_url(repo, &format!("issues/comments/{}", comment_id.0));
        info!("Updating comment {} in {}", comment_id.0, repo);

        let builder = Self::with_json_body(
            self.request(self.client.patch(&url)),
            &CommentRequest { body },
        )?;
        Self::send_checked(builder, "update comment").await?;
        Ok(())
    }

    async fn create_review_comment(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        commit_sha: &str,
        comment: &InlineComment,
    ) -> Result<()> {
        let url = self.repo_url(repo, &format!("pulls/{}/comments", pr_number));
        let request = ReviewCommentRequest {
            body: &comment.body,
            commit_id: commit_sha,
            path: &comment.path,
            line: comment.line,
            side: "RIGHT",
        };

        let builder = Self::with_json_body(self.request(self.client.post(&url)), &request)?;
        Self::send_checked(builder, "create review comment").await?;
        Ok(())
    }

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        head_sha: &str,
        update: &CheckRunUpdate,
    ) -> Result<CheckRunId> {
        let url = self.repo_url(repo, "check-runs");
        let request = CheckRunRequest::new(Some(head_sha), update);

        let builder = Self::with_json_body(self.request(self.client.post(&url)), &request)?;
        let check_run: CheckRunResponse = Self::send_checked(builder, "create check run")
            .await?
            .json()
            .await
            .context("Failed to parse check run response")?;

        info!("Created check run {} for {}", check_run.id, head_sha);
        Ok(CheckRunId(check_run.id))
    }

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        check_run_id: CheckRunId,
        update: &CheckRunUpdate,
    ) -> Result<()> {
        let url = self.repo_url(repo, &format!("check-runs/{}", check_run_id.0));
        if update.annotations.len() > MAX_ANNOTATIONS_PER_REQUEST {
            warn!(
                "Dropping {} annotations above the per-request limit",
                update.annotations.len() - MAX_ANNOTATIONS_PER_REQUEST
            );
        }
        let request = CheckRunRequest::new(None, update);

        let builder = Self::with_json_body(self.request(self.client.patch(&url)), &request)?;
        Self::send_checked(builder, "update check run").await?;
        info!("Updated check run {}", check_run_id.0);
        Ok(())
    }
}

pub fn create_github_client(
    timeout: Duration,
    recording_logger: Option<RecordingLogger>,
) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("diffdragon/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")?;

    let mut builder = reqwest_middleware::ClientBuilder::new(client);
    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger, ServiceType::GitHub));
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AnnotationLevel;

    fn annotation(line: u64) -> CheckRunAnnotation {
        CheckRunAnnotation {
            path: "src/lib.rs".to_string(),
            start_line: line,
            end_line: line,
            annotation_level: AnnotationLevel::Notice,
            message: format!("note {}", line),
        }
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = SystemTime::now();
        assert!(token_is_fresh(now + Duration::from_secs(3600), now));
        assert!(!token_is_fresh(now + Duration::from_secs(299), now));
        assert!(!token_is_fresh(now - Duration::from_secs(1), now));
    }

    #[test]
    fn test_create_check_run_request_serialization() {
        let update = CheckRunUpdate::in_progress("Reviewing", "Analyzing 3 files");
        let json = serde_json::to_value(CheckRunRequest::new(Some("abc123"), &update)).unwrap();

        assert_eq!(json["name"], CHECK_RUN_NAME);
        assert_eq!(json["head_sha"], "abc123");
        assert_eq!(json["status"], "in_progress");
        assert!(json.get("conclusion").is_none());
        assert!(json.get("started_at").is_some());
        assert!(json.get("completed_at").is_none());
        assert!(json["output"].get("annotations").is_none());
    }

    #[test]
    fn test_update_check_run_request_caps_annotations() {
        let mut update =
            CheckRunUpdate::completed(CheckRunConclusion::Success, "Review complete", "done");
        update.annotations = (1..=60).map(annotation).collect();
        let json = serde_json::to_value(CheckRunRequest::new(None, &update)).unwrap();

        assert!(json.get("name").is_none());
        assert!(json.get("head_sha").is_none());
        assert_eq!(json["status"], "completed");
        assert_eq!(json["conclusion"], "success");
        assert!(json.get("completed_at").is_some());
        let annotations = json["output"]["annotations"].as_array().unwrap();
        assert_eq!(annotations.len(), MAX_ANNOTATIONS_PER_REQUEST);
        assert_eq!(annotations[0]["annotation_level"], "notice");
        assert_eq!(annotations[49]["start_line"], 50);
    }

    #[test]
    fn test_review_comment_targets_right_side() {
        let request = ReviewCommentRequest {
            body: "Consider a bound here",
            commit_id: "abc",
            path: "src/cache.rs",
            line: 7,
            side: "RIGHT",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["side"], "RIGHT");
        assert_eq!(json["commit_id"], "abc");
        assert_eq!(json["line"], 7);
    }

    #[test]
    fn test_pull_request_file_without_patch() {
        let file: PullRequestFile =
            serde_json::from_value(serde_json::json!({"filename": "logo.png", "status": "added"}))
                .unwrap();
        assert_eq!(file.filename, "logo.png");
        assert!(file.patch.is_none());
    }
}
