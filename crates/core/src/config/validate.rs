use super::{types::Config, ConfigError};

/// Validate configuration
///
/// Rejects a zero server port, a zero external call interval, a zero
/// attachment threshold, and a Jira section with empty fields.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.export.min_call_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "export.min_call_interval_ms must be greater than 0".to_string(),
        ));
    }

    if config.export.attachment_threshold_chars == 0 {
        return Err(ConfigError::ValidationError(
            "export.attachment_threshold_chars must be greater than 0".to_string(),
        ));
    }

    if config.export.progress_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "export.progress_buffer must be greater than 0".to_string(),
        ));
    }

    if let Some(jira) = &config.jira {
        let required = [
            ("jira.base_url", &jira.base_url),
            ("jira.email", &jira.email),
            ("jira.api_token", &jira.api_token),
            ("jira.project_key", &jira.project_key),
            ("jira.issue_type", &jira.issue_type),
            ("jira.link_type", &jira.link_type),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if !jira.base_url.starts_with("http://") && !jira.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(
                "jira.base_url must start with http:// or https://".to_string(),
            ));
        }

        if jira.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "jira.timeout_secs must be greater than 0".to_string(),
            ));
        }
    }

    Ok(())
}
