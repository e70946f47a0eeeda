use serde::Deserialize;

pub const HTTP_TIMEOUT_SECONDS_DEFAULT: u64 = 30;
pub const ENVIRONMENT_DEFAULT: &str = "development";
pub const ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];

/// ================================
/// Global service-wide settings
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub server: ServerConfig,
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    /// deployment name reported by `/status`
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: String,
    #[serde(default)]
    pub is_enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { path: default_metrics_path(), is_enabled: false }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: String
}

/// Outbound HTTP behaviour, shared by token exchanges and query calls.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// upper bound for every outbound call, no call may block longer
    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: default_http_timeout_seconds() }
    }
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // allowed: trace, debug, info, warn, error
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new (level: String, format: LogFormat) -> Self {
        Self { level, format }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_environment() -> String {
    ENVIRONMENT_DEFAULT.to_string()
}

fn default_http_timeout_seconds() -> u64 {
    HTTP_TIMEOUT_SECONDS_DEFAULT
}
