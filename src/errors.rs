//! Error taxonomy of the token path and the query relay.
//!
//! Everything below the lifecycle manager returns [`BrokerError`] and the
//! manager hands it back unmodified; only the HTTP layer maps it to a status
//! code and an [`ErrorCode`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Which outbound call produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStage {
    Primary,
    Downstream,
    Query,
}

impl ExchangeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStage::Primary => "primary",
            ExchangeStage::Downstream => "downstream",
            ExchangeStage::Query => "query",
        }
    }
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Missing or unusable credential material.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("assertion signing failed: {0}")]
    Signing(String),

    /// Non-2xx answer from one of the token endpoints.
    #[error("{stage} token exchange failed with status {status_code}: {body}")]
    AuthExchange {
        stage: ExchangeStage,
        status_code: u16,
        body: String,
    },

    #[error("{stage} call timed out")]
    Timeout { stage: ExchangeStage },

    #[error("{stage} transport error: {reason}")]
    Transport { stage: ExchangeStage, reason: String },

    /// 2xx answer whose body does not match the expected schema.
    #[error("{stage} response rejected: {reason}")]
    InvalidResponse { stage: ExchangeStage, reason: String },

    #[error("validation error: {0}")]
    Validation(String),

    /// Non-2xx answer from the query API.
    #[error("query failed with status {status_code}: {body}")]
    Query { status_code: u16, body: String },
}

impl BrokerError {
    /// Classify a `reqwest` transport failure for the given stage.
    pub fn from_transport(stage: ExchangeStage, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrokerError::Timeout { stage }
        } else {
            BrokerError::Transport {
                stage,
                reason: err.to_string(),
            }
        }
    }

    /// Short label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            BrokerError::Configuration(_) => "configuration",
            BrokerError::Signing(_) => "signing",
            BrokerError::AuthExchange { .. } => "status",
            BrokerError::Timeout { .. } => "timeout",
            BrokerError::Transport { .. } => "transport",
            BrokerError::InvalidResponse { .. } => "invalid_response",
            BrokerError::Validation(_) => "validation",
            BrokerError::Query { .. } => "status",
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            BrokerError::Configuration(_)
            | BrokerError::Signing(_)
            | BrokerError::AuthExchange { .. } => ErrorCode::AuthenticationFailed,
            BrokerError::Timeout { .. } => ErrorCode::QueryTimeout,
            BrokerError::Validation(_) => ErrorCode::ValidationError,
            BrokerError::Query { status_code, .. } if *status_code == 400 => {
                ErrorCode::InvalidQuery
            }
            BrokerError::Query { status_code, .. } if *status_code == 404 => {
                ErrorCode::DataNotFound
            }
            BrokerError::Query { status_code, .. } if *status_code == 429 => {
                ErrorCode::RateLimitExceeded
            }
            BrokerError::InvalidResponse { stage, .. } | BrokerError::Transport { stage, .. }
                if *stage != ExchangeStage::Query =>
            {
                ErrorCode::AuthenticationFailed
            }
            _ => ErrorCode::InternalError,
        }
    }
}

/// Caller-facing error codes reported by the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationFailed,
    InvalidQuery,
    RateLimitExceeded,
    DataNotFound,
    InternalError,
    ValidationError,
    QueryTimeout,
}

pub type BrokerResult<T> = Result<T, BrokerError>;
