use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::ticket::DEFAULT_ATTACHMENT_THRESHOLD_CHARS;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub export: ExportConfig,
    /// External tracker credentials. Export endpoints refuse to run without it.
    #[serde(default)]
    pub jira: Option<JiraConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tessera.db")
}

/// Export orchestration tuning
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExportConfig {
    /// Minimum spacing between consecutive external API calls.
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
    /// Wait before an automatic retry after a transient failure.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Bodies longer than this many characters are shipped as attachments.
    #[serde(default = "default_attachment_threshold_chars")]
    pub attachment_threshold_chars: usize,
    /// Capacity of the progress broadcast channel.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            min_call_interval_ms: default_min_call_interval_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            attachment_threshold_chars: default_attachment_threshold_chars(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

fn default_min_call_interval_ms() -> u64 {
    250
}

fn default_retry_backoff_ms() -> u64 {
    5_000
}

fn default_attachment_threshold_chars() -> usize {
    DEFAULT_ATTACHMENT_THRESHOLD_CHARS
}

fn default_progress_buffer() -> usize {
    256
}

/// Jira Cloud connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JiraConfig {
    /// Site URL (e.g., "https://example.atlassian.net")
    pub base_url: String,
    /// Account email used for basic auth
    pub email: String,
    /// API token paired with `email`
    pub api_token: String,
    /// Project the tickets are created in
    pub project_key: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
    /// Issue link type used for dependencies
    #[serde(default = "default_link_type")]
    pub link_type: String,
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_issue_type() -> String {
    "Task".to_string()
}

fn default_link_type() -> String {
    "Blocks".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub export: ExportConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jira: Option<SanitizedJiraConfig>,
}

/// Sanitized Jira config (API token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedJiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token_configured: bool,
    pub project_key: String,
    pub issue_type: String,
    pub link_type: String,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            export: config.export.clone(),
            jira: config.jira.as_ref().map(|j| SanitizedJiraConfig {
                base_url: j.base_url.clone(),
                email: j.email.clone(),
                api_token_configured: !j.api_token.is_empty(),
                project_key: j.project_key.clone(),
                issue_type: j.issue_type.clone(),
                link_type: j.link_type.clone(),
                timeout_secs: j.timeout_secs,
            }),
        }
    }
}
