use serde::Deserialize;

use crate::config::{credentials::CredentialsConfig, settings::SettingsConfig};

pub const QUERY_PATH_DEFAULT: &str = "/api/v2/query";
pub const METADATA_PATH_DEFAULT: &str = "/api/v1/metadata";
pub const MAX_BATCH_SIZE_DEFAULT: usize = 20;
pub const API_KEY_HEADER_DEFAULT: &str = "X-API-Key";

/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub settings: SettingsConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// ================================
/// Query relay
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_query_path")]
    pub query_path: String,
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            query_path: default_query_path(),
            metadata_path: default_metadata_path(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// ================================
/// Inbound API keys
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default)]
    pub allowed_api_keys: Vec<String>,
    #[serde(default)]
    pub enable_api_key_validation: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            allowed_api_keys: Vec::new(),
            enable_api_key_validation: false,
        }
    }
}

fn default_query_path() -> String {
    QUERY_PATH_DEFAULT.to_string()
}

fn default_metadata_path() -> String {
    METADATA_PATH_DEFAULT.to_string()
}

fn default_max_batch_size() -> usize {
    MAX_BATCH_SIZE_DEFAULT
}

fn default_api_key_header() -> String {
    API_KEY_HEADER_DEFAULT.to_string()
}
