use serde::Deserialize;

pub const ASSERTION_LIFETIME_MINUTES_DEFAULT: u64 = 3;
pub const REFRESH_THRESHOLD_SECONDS_DEFAULT: u64 = 60;
pub const SIGNING_ALGORITHM_DEFAULT: &str = "RS256";
pub const LOGIN_URL_DEFAULT: &str = "https://login.salesforce.com";
pub const PRIMARY_TOKEN_PATH: &str = "/services/oauth2/token";
pub const DOWNSTREAM_TOKEN_PATH_DEFAULT: &str = "/services/oauth2/token";

/// ================================
/// Credentials
/// ================================
/// Immutable after startup; everything the signer and the exchanger need.
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// issuer of the assertion (connected app consumer key)
    pub client_id: String,
    /// subject of the assertion
    pub username: String,
    pub private_key_path: String,
    /// assertion audience and base of the primary token endpoint
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_assertion_lifetime_minutes")]
    pub assertion_lifetime_minutes: u64,
    /// a token is treated as stale this long before it really expires;
    /// set at most one of the two units
    #[serde(default)]
    pub refresh_threshold_seconds: Option<u64>,
    #[serde(default)]
    pub refresh_threshold_minutes: Option<u64>,
    /// data partition the downstream token is scoped to
    pub dataspace: Option<String>,
    #[serde(default = "default_downstream_token_path")]
    pub downstream_token_path: String,
}

impl CredentialsConfig {
    pub fn primary_token_url(&self) -> String {
        format!("{}{}", self.login_url.trim_end_matches('/'), PRIMARY_TOKEN_PATH)
    }

    pub fn downstream_token_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.downstream_token_path)
    }

    pub fn assertion_lifetime_seconds(&self) -> u64 {
        self.assertion_lifetime_minutes * 60
    }

    /// Effective refresh threshold in seconds, whichever unit was configured.
    pub fn refresh_threshold_seconds(&self) -> u64 {
        match (self.refresh_threshold_seconds, self.refresh_threshold_minutes) {
            (Some(secs), _) => secs,
            (None, Some(mins)) => mins.saturating_mul(60),
            (None, None) => REFRESH_THRESHOLD_SECONDS_DEFAULT,
        }
    }
}

fn default_login_url() -> String {
    LOGIN_URL_DEFAULT.to_string()
}

fn default_algorithm() -> String {
    SIGNING_ALGORITHM_DEFAULT.to_string()
}

fn default_assertion_lifetime_minutes() -> u64 {
    ASSERTION_LIFETIME_MINUTES_DEFAULT
}

fn default_downstream_token_path() -> String {
    DOWNSTREAM_TOKEN_PATH_DEFAULT.to_string()
}
