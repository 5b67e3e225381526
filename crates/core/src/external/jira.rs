//! Jira Cloud REST v3 client.
//!
//! Authenticates with an account email and API token (basic auth).
//! Only the three calls export needs are implemented.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{CreatedTicket, ExternalError, ExternalTicketClient};
use crate::config::JiraConfig;

/// Jira rejects summaries longer than this.
const MAX_SUMMARY_CHARS: usize = 255;

/// Jira API client.
pub struct JiraClient {
    client: Client,
    base_url: String,
    email: String,
    api_token: String,
    project_key: String,
    issue_type: String,
    link_type: String,
}

#[derive(Debug, Deserialize)]
struct CreateIssueResponse {
    key: String,
}

impl JiraClient {
    /// Create a new Jira client.
    pub fn new(config: &JiraConfig) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            api_token: config.api_token.clone(),
            project_key: config.project_key.clone(),
            issue_type: config.issue_type.clone(),
            link_type: config.link_type.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/rest/api/3/{}", self.base_url, path)
    }

    /// Human-facing URL of an issue.
    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }

    fn create_issue_payload(&self, title: &str, body: &str) -> Value {
        json!({
            "fields": {
                "project": { "key": self.project_key },
                "issuetype": { "name": self.issue_type },
                "summary": truncate_summary(title),
                "description": to_adf(body),
            }
        })
    }

    /// Turn a non-success response into an error; pass successes through.
    async fn check(response: Response, context: &str) -> Result<Response, ExternalError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after_ms = retry_after_ms(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status.as_u16(), retry_after_ms, context, body))
    }
}

#[async_trait]
impl ExternalTicketClient for JiraClient {
    async fn create_ticket(&self, title: &str, body: &str) -> Result<CreatedTicket, ExternalError> {
        debug!(project = %self.project_key, "Jira create issue: '{}'", title);

        let response = self
            .client
            .post(self.api_url("issue"))
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&self.create_issue_payload(title, body))
            .send()
            .await?;
        let response = Self::check(response, &format!("project {}", self.project_key)).await?;

        let created: CreateIssueResponse = response.json().await.map_err(|e| {
            ExternalError::InvalidResponse(format!("Failed to parse create issue response: {}", e))
        })?;

        if !is_valid_issue_key(&created.key) {
            return Err(ExternalError::InvalidResponse(format!(
                "Unexpected issue key '{}'",
                created.key
            )));
        }

        Ok(CreatedTicket {
            url: self.browse_url(&created.key),
            key: created.key,
        })
    }

    async fn upload_attachment(
        &self,
        key: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), ExternalError> {
        debug!("Jira upload attachment: key={}, file={}, bytes={}", key, filename, content.len());

        let part = Part::bytes(content.to_vec())
            .file_name(filename.to_string())
            .mime_str("text/markdown")
            .map_err(|e| ExternalError::InvalidResponse(e.to_string()))?;
        let form = Form::new().part("file", part);

        let url = self.api_url(&format!("issue/{}/attachments", urlencoding::encode(key)));
        let response = self
            .client
            .post(url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("X-Atlassian-Token", "no-check")
            .multipart(form)
            .send()
            .await?;
        Self::check(response, &format!("issue {}", key)).await?;

        Ok(())
    }

    async fn create_link(&self, key_a: &str, key_b: &str) -> Result<(), ExternalError> {
        debug!("Jira link: {} is blocked by {} ({})", key_a, key_b, self.link_type);

        // "Blocks": the outward issue blocks the inward one.
        let payload = json!({
            "type": { "name": self.link_type },
            "inwardIssue": { "key": key_a },
            "outwardIssue": { "key": key_b },
        });

        let response = self
            .client
            .post(self.api_url("issueLink"))
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&payload)
            .send()
            .await?;
        Self::check(response, &format!("link {} -> {}", key_a, key_b)).await?;

        Ok(())
    }
}

/// Map an unsuccessful HTTP status to an error.
fn error_for_status(
    status: u16,
    retry_after_ms: Option<u64>,
    context: &str,
    body: String,
) -> ExternalError {
    match status {
        401 => ExternalError::Unauthorized,
        403 => ExternalError::Forbidden(context.to_string()),
        404 => ExternalError::NotFound(context.to_string()),
        408 => ExternalError::Timeout,
        429 => ExternalError::RateLimited { retry_after_ms },
        _ => ExternalError::Api {
            status,
            message: extract_error_message(&body),
        },
    }
}

/// `Retry-After` in milliseconds (Jira sends whole seconds).
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1000)
}

/// Pull `errorMessages`/`errors` out of a Jira error body, falling back to the raw text.
fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    let mut messages: Vec<String> = value
        .get("errorMessages")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if let Some(errors) = value.get("errors").and_then(Value::as_object) {
        for (field, msg) in errors {
            if let Some(msg) = msg.as_str() {
                messages.push(format!("{}: {}", field, msg));
            }
        }
    }

    if messages.is_empty() {
        body.to_string()
    } else {
        messages.join("; ")
    }
}

fn truncate_summary(title: &str) -> String {
    let title = title.trim();
    if title.chars().count() <= MAX_SUMMARY_CHARS {
        return title.to_string();
    }
    let mut summary: String = title.chars().take(MAX_SUMMARY_CHARS - 3).collect();
    summary.push_str("...");
    summary
}

/// Wrap plain text into an Atlassian Document Format document, one paragraph per blank-line block.
fn to_adf(body: &str) -> Value {
    let paragraphs: Vec<Value> = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            json!({
                "type": "paragraph",
                "content": [{ "type": "text", "text": p }],
            })
        })
        .collect();

    json!({
        "type": "doc",
        "version": 1,
        "content": paragraphs,
    })
}

fn is_valid_issue_key(key: &str) -> bool {
    regex_lite::Regex::new(r"^[A-Z][A-Z0-9_]*-[0-9]+$")
        .map(|re| re.is_match(key))
        .unwrap_or(false)
}
