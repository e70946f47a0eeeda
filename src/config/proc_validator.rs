//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - Validates:
//!   * logging / server / metrics / outbound timeout / environment settings
//!   * credential material presence and signing algorithm
//!   * token and query endpoint paths
//!   * api key settings

use std::path::Path;

use tracing::{error, info};

use crate::config::credentials::CredentialsConfig;
use crate::config::service::{QueryConfig, SecurityConfig, ServiceConfig};
use crate::config::settings::{SettingsConfig, ENVIRONMENTS};
use crate::signer::assertion::parse_algorithm;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);
    validate_credentials(&cfg.credentials, &mut errors);
    validate_query(&cfg.query, &mut errors);
    validate_security(&cfg.security, &mut errors);

    if errors.is_empty() {
        info!("config validation passed");
        Ok(())
    } else {
        for e in &errors {
            error!("config: {}", e);
        }
        Err(errors)
    }
}

fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    if let Some(logging) = &settings.logging {
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' must be one of {:?}",
                logging.level, LOG_LEVELS
            ));
        }
    }

    if settings.server.host.trim().is_empty() {
        errors.push("settings.server.host must not be empty".to_string());
    }
    if settings.server.port.parse::<u16>().is_err() {
        errors.push(format!(
            "settings.server.port '{}' is not a valid port",
            settings.server.port
        ));
    }

    if settings.metrics.is_enabled && !settings.metrics.path.starts_with('/') {
        errors.push(format!(
            "settings.metrics.path '{}' must start with '/'",
            settings.metrics.path
        ));
    }

    if settings.http.timeout_seconds == 0 {
        errors.push("settings.http.timeout_seconds must be > 0".to_string());
    }

    if !ENVIRONMENTS.contains(&settings.environment.as_str()) {
        errors.push(format!(
            "settings.environment '{}' must be one of {:?}",
            settings.environment, ENVIRONMENTS
        ));
    }
}

fn validate_credentials(creds: &CredentialsConfig, errors: &mut Vec<String>) {
    if creds.client_id.trim().is_empty() {
        errors.push("credentials.client_id must not be empty".to_string());
    }
    if creds.username.trim().is_empty() {
        errors.push("credentials.username must not be empty".to_string());
    }

    let key_path = Path::new(&creds.private_key_path);
    if creds.private_key_path.trim().is_empty() {
        errors.push("credentials.private_key_path must not be empty".to_string());
    } else if !key_path.exists() {
        errors.push(format!(
            "credentials.private_key_path '{}' does not exist",
            creds.private_key_path
        ));
    } else if !key_path.is_file() {
        errors.push(format!(
            "credentials.private_key_path '{}' is not a file",
            creds.private_key_path
        ));
    }

    if !is_http_url(&creds.login_url) {
        errors.push(format!(
            "credentials.login_url '{}' must start with http:// or https://",
            creds.login_url
        ));
    }

    if let Err(e) = parse_algorithm(&creds.algorithm) {
        errors.push(format!("credentials.algorithm: {}", e));
    }

    if creds.assertion_lifetime_minutes == 0 {
        errors.push("credentials.assertion_lifetime_minutes must be > 0".to_string());
    }

    if creds.refresh_threshold_seconds.is_some() && creds.refresh_threshold_minutes.is_some() {
        errors.push(
            "credentials.refresh_threshold_seconds and credentials.refresh_threshold_minutes are mutually exclusive"
                .to_string(),
        );
    }

    if !creds.downstream_token_path.starts_with('/') {
        errors.push(format!(
            "credentials.downstream_token_path '{}' must start with '/'",
            creds.downstream_token_path
        ));
    }

    if let Some(dataspace) = &creds.dataspace {
        if dataspace.trim().is_empty() {
            errors.push("credentials.dataspace must not be blank when set".to_string());
        }
    }
}

fn validate_query(query: &QueryConfig, errors: &mut Vec<String>) {
    for (name, path) in [("query_path", &query.query_path), ("metadata_path", &query.metadata_path)] {
        if !path.starts_with('/') {
            errors.push(format!("query.{} '{}' must start with '/'", name, path));
        }
    }
    if query.max_batch_size == 0 {
        errors.push("query.max_batch_size must be > 0".to_string());
    }
}

fn validate_security(security: &SecurityConfig, errors: &mut Vec<String>) {
    if !security.enable_api_key_validation {
        return;
    }
    if security.api_key_header.trim().is_empty() {
        errors.push("security.api_key_header must not be empty".to_string());
    }
    if security.allowed_api_keys.iter().all(|k| k.trim().is_empty()) {
        errors.push(
            "security.allowed_api_keys must contain at least one key when api key validation is enabled"
                .to_string(),
        );
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
