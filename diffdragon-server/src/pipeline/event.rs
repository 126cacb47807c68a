//! Pull-request webhook payloads.

use serde::Deserialize;

use crate::host::RepoRef;
use crate::ledger::ReviewKey;
use crate::publish::ReviewTarget;

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub installation: Option<Installation>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub head: PullRequestRef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestRef {
    pub sha: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

/// A verified pull-request event with everything a review needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub action: String,
    pub pr_number: u64,
    pub head_sha: String,
    pub repo: RepoRef,
    pub installation_id: u64,
}

impl InboundEvent {
    pub fn ledger_key(&self) -> ReviewKey {
        ReviewKey::new(
            self.repo.owner.clone(),
            self.repo.name.clone(),
            self.pr_number,
            self.head_sha.clone(),
        )
    }

    pub fn target(&self) -> ReviewTarget {
        ReviewTarget {
            repo: self.repo.clone(),
            pr_number: self.pr_number,
            head_sha: self.head_sha.clone(),
        }
    }
}

/// How a raw delivery body classifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedDelivery {
    Event(InboundEvent),
    /// Valid JSON, but not about a pull request.
    NotPullRequest,
    MissingInstallation,
    Malformed(String),
}

pub fn parse_delivery(raw_body: &[u8]) -> ParsedDelivery {
    let payload: GitHubWebhookPayload = match serde_json::from_slice(raw_body) {
        Ok(payload) => payload,
        Err(e) => return ParsedDelivery::Malformed(e.to_string()),
    };

    let Some(pull_request) = payload.pull_request else {
        return ParsedDelivery::NotPullRequest;
    };

    let Some(installation) = payload.installation else {
        return ParsedDelivery::MissingInstallation;
    };

    let Some(repository) = payload.repository else {
        return ParsedDelivery::Malformed("pull request event without repository".to_string());
    };

    ParsedDelivery::Event(InboundEvent {
        action: payload.action.unwrap_or_default(),
        pr_number: pull_request.number,
        head_sha: pull_request.head.sha,
        repo: RepoRef::new(repository.owner.login, repository.name),
        installation_id: installation.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pr_payload() -> serde_json::Value {
        json!({
            "action": "opened",
            "number": 7,
            "pull_request": {
                "number": 7,
                "head": {"sha": "abc123", "ref": "feature"},
                "base": {"sha": "def456", "ref": "main"}
            },
            "repository": {
                "name": "widgets",
                "full_name": "octo/widgets",
                "owner": {"login": "octo", "id": 1}
            },
            "installation": {"id": 99}
        })
    }

    #[test]
    fn test_parse_pull_request_event() {
        let body = serde_json::to_vec(&pr_payload()).unwrap();
        let ParsedDelivery::Event(event) = parse_delivery(&body) else {
            panic!("expected an event");
        };

        assert_eq!(event.action, "opened");
        assert_eq!(event.pr_number, 7);
        assert_eq!(event.head_sha, "abc123");
        assert_eq!(event.repo, RepoRef::new("octo", "widgets"));
        assert_eq!(event.installation_id, 99);
        assert_eq!(event.ledger_key(), ReviewKey::new("octo", "widgets", 7, "abc123"));
    }

    #[test]
    fn test_parse_non_pull_request_event() {
        let body = serde_json::to_vec(&json!({"zen": "Keep it logically awesome.", "hook_id": 1}))
            .unwrap();
        assert_eq!(parse_delivery(&body), ParsedDelivery::NotPullRequest);
    }

    #[test]
    fn test_parse_null_pull_request_is_not_pull_request() {
        let mut payload = pr_payload();
        payload["pull_request"] = serde_json::Value::Null;
        let body = serde_json::to_vec(&payload).unwrap();
        assert_eq!(parse_delivery(&body), ParsedDelivery::NotPullRequest);
    }

    #[test]
    fn test_parse_missing_installation() {
        let mut payload = pr_payload();
        payload.as_object_mut().unwrap().remove("installation");
        let body = serde_json::to_vec(&payload).unwrap();
        assert_eq!(parse_delivery(&body), ParsedDelivery::MissingInstallation);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_delivery(b"{not json"),
            ParsedDelivery::Malformed(_)
        ));

        let mut payload = pr_payload();
        payload["pull_request"]["head"] = json!({});
        let body = serde_json::to_vec(&payload).unwrap();
        assert!(matches!(parse_delivery(&body), ParsedDelivery::Malformed(_)));
    }
}
