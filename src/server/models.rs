//! Inbound request bodies and the response envelope of the HTTP API.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, BrokerResult, ErrorCode};
use crate::query::customer::CASES_LIMIT_DEFAULT;

pub const MAX_QUERY_LENGTH: usize = 10_000;
pub const MAX_CORRELATION_ID_LENGTH: usize = 100;
pub const MAX_LIMIT: u32 = 1000;

const FORBIDDEN_FRAGMENTS: [&str; 4] = [";", "--", "/*", "*/"];

// whole words only, so column names like CreatedDate__c stay usable
static FORBIDDEN_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DROP|DELETE|UPDATE|INSERT|CREATE|ALTER|EXEC|EXECUTE)\b")
        .expect("forbidden keyword pattern")
});

static LIMIT_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+\d+").expect("limit pattern")
});

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl QueryRequest {
    pub fn validate(&self) -> BrokerResult<()> {
        validate_query(&self.query)?;
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_LIMIT {
                return Err(BrokerError::Validation(format!(
                    "limit must be between 1 and {}",
                    MAX_LIMIT
                )));
            }
        }
        validate_correlation_id(self.correlation_id.as_deref())
    }

    /// The query as it is sent upstream: trimmed, with `limit` applied
    /// unless the query already carries its own LIMIT clause.
    pub fn effective_query(&self) -> String {
        let query = self.query.trim();
        match self.limit {
            Some(limit) if !LIMIT_CLAUSE.is_match(query) => format!("{} LIMIT {}", query, limit),
            _ => query.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchQueryRequest {
    pub queries: Vec<QueryRequest>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl BatchQueryRequest {
    pub fn validate(&self, max_batch_size: usize) -> BrokerResult<()> {
        if self.queries.is_empty() {
            return Err(BrokerError::Validation("at least one query must be provided".into()));
        }
        if self.queries.len() > max_batch_size {
            return Err(BrokerError::Validation(format!(
                "at most {} queries allowed per batch",
                max_batch_size
            )));
        }
        for (i, query) in self.queries.iter().enumerate() {
            query
                .validate()
                .map_err(|e| BrokerError::Validation(format!("query #{}: {}", i, e)))?;
        }
        validate_correlation_id(self.correlation_id.as_deref())
    }
}

/// Email and filters are checked by the forwarder before anything is sent.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfileRequest {
    pub email: String,
    #[serde(default = "default_true")]
    pub include_related_data: bool,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaseQueryRequest {
    pub email: String,
    #[serde(default)]
    pub status_filter: Option<String>,
    #[serde(default = "default_cases_limit")]
    pub limit: u32,
    #[serde(default = "default_true")]
    pub include_case_details: bool,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyQueryRequest {
    pub email: String,
    #[serde(default)]
    pub include_transaction_history: bool,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl UserProfileRequest {
    pub fn validate(&self) -> BrokerResult<()> {
        validate_correlation_id(self.correlation_id.as_deref())
    }
}

impl CaseQueryRequest {
    pub fn validate(&self) -> BrokerResult<()> {
        validate_correlation_id(self.correlation_id.as_deref())
    }
}

impl LoyaltyQueryRequest {
    pub fn validate(&self) -> BrokerResult<()> {
        validate_correlation_id(self.correlation_id.as_deref())
    }
}

fn default_true() -> bool {
    true
}

fn default_cases_limit() -> u32 {
    CASES_LIMIT_DEFAULT
}

fn validate_query(query: &str) -> BrokerResult<()> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(BrokerError::Validation("query cannot be empty".into()));
    }
    if query.chars().count() > MAX_QUERY_LENGTH {
        return Err(BrokerError::Validation(format!(
            "query exceeds {} characters",
            MAX_QUERY_LENGTH
        )));
    }
    if let Some(fragment) = FORBIDDEN_FRAGMENTS.iter().find(|f| trimmed.contains(*f)) {
        return Err(BrokerError::Validation(format!(
            "query contains forbidden pattern '{}'",
            fragment
        )));
    }
    if let Some(m) = FORBIDDEN_KEYWORDS.find(trimmed) {
        return Err(BrokerError::Validation(format!(
            "query contains forbidden keyword '{}'",
            m.as_str().to_uppercase()
        )));
    }
    Ok(())
}

fn validate_correlation_id(id: Option<&str>) -> BrokerResult<()> {
    match id {
        Some(id) if id.len() > MAX_CORRELATION_ID_LENGTH => Err(BrokerError::Validation(format!(
            "correlation id exceeds {} characters",
            MAX_CORRELATION_ID_LENGTH
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Envelope around every `/api/v1` answer.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub processing_time_ms: f64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, correlation_id: Option<String>, processing_time_ms: f64) -> Self {
        Self::with_status(ResponseStatus::Success, data, correlation_id, processing_time_ms)
    }

    pub fn with_status(
        status: ResponseStatus,
        data: T,
        correlation_id: Option<String>,
        processing_time_ms: f64,
    ) -> Self {
        Self {
            status,
            data: Some(data),
            error: None,
            correlation_id,
            processing_time_ms,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(err: &BrokerError, correlation_id: Option<String>, processing_time_ms: f64) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            error: Some(ErrorDetail {
                code: err.error_code(),
                message: err.to_string(),
                timestamp: Utc::now(),
            }),
            correlation_id,
            processing_time_ms,
        }
    }
}
