use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::analysis::{count_changed_lines, AnalysisResult, ChangedFile, ReviewAnalyzer};
use crate::policy::Policy;
use crate::prompt::{system_prompt, user_prompt};
use crate::recording::{RecordingLogger, RecordingMiddleware, ServiceType};

pub const DEFAULT_MODEL: &str = "gpt-4.1";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// [`ReviewAnalyzer`] backed by the OpenAI chat-completions API.
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    client: ClientWithMiddleware,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

impl OpenAiAnalyzer {
    pub fn new(
        api_key: String,
        model: String,
        timeout: Duration,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("diffdragon/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create OpenAI HTTP client")?;

        let mut builder = reqwest_middleware::ClientBuilder::new(client);
        if let Some(logger) = recording_logger {
            builder = builder.with(RecordingMiddleware::new(logger, ServiceType::OpenAi));
        }

        Ok(Self {
            client: builder.build(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the analyzer at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn complete(&self, files: &[ChangedFile], policy: &Policy) -> Result<AnalysisResult> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(policy),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(files),
                },
            ],
            response_format: response_format(),
        };

        let url = format!("{}/chat/completions", self.base_url);
        info!(
            "Requesting review of {} files from model {}",
            files.len(),
            self.model
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("OpenAI API error: {} - {}", status, error_text);
            return Err(anyhow!(
                "OpenAI chat completions error: {} - {}",
                status,
                error_text
            ));
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        parse_completion(body)
    }
}

#[async_trait]
impl ReviewAnalyzer for OpenAiAnalyzer {
    async fn analyze(&self, files: &[ChangedFile], policy: &Policy) -> Result<AnalysisResult> {
        if let Some(result) = over_budget(files, policy) {
            return Ok(result);
        }
        self.complete(files, policy).await
    }
}

/// The skip result for a diff larger than the policy allows, if it is.
pub fn over_budget(files: &[ChangedFile], policy: &Policy) -> Option<AnalysisResult> {
    let budget = policy.ai.max_diff_lines?;
    let changed = count_changed_lines(files);
    if changed <= budget {
        return None;
    }

    info!(
        "Diff has {} changed lines, above the budget of {}; skipping analysis",
        changed, budget
    );
    Some(AnalysisResult {
        summary: format!(
            "This pull request changes {} lines, which exceeds the configured limit of {} \
             (`ai.maxDiffLines`). Automated review was skipped.",
            changed, budget
        ),
        suggestions: vec!["Consider splitting this change into smaller pull requests.".to_string()],
        release_notes: String::new(),
        inline_comments: Vec::new(),
    })
}

fn parse_completion(body: ChatResponse) -> Result<AnalysisResult> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .context("Chat completion returned no choices")?;

    if let Some(refusal) = choice.message.refusal {
        return Err(anyhow!("Model refused to review: {}", refusal));
    }

    if choice.finish_reason.as_deref() == Some("length") {
        return Err(anyhow!("Model output was truncated"));
    }

    let content = choice
        .message
        .content
        .context("Chat completion had no content")?;

    serde_json::from_str(&content).context("Model output did not match the review schema")
}

fn response_format() -> serde_json::Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "DiffDragonReview",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "suggestions": {"type": "array", "items": {"type": "string"}},
                    "releaseNotes": {"type": "string"},
                    "inlineComments": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {"type": "string"},
                                "line": {"type": "integer"},
                                "body": {"type": "string"}
                            },
                            "required": ["path", "line", "body"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["summary", "suggestions", "releaseNotes", "inlineComments"],
                "additionalProperties": false
            }
        }
    })
}
