//! Query relay: every call takes a downstream token from the lifecycle
//! manager, hits the query API once and reshapes the answer.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::service::QueryConfig;
use crate::errors::{BrokerError, BrokerResult, ErrorCode, ExchangeStage};
use crate::helpers::time::get_instant;
use crate::manager::lifecycle::TokenManager;
use crate::observability::metrics::Metrics;
use crate::query::normalize::{normalize_query_response, QueryResult};
use crate::sources::exchange::{ExchangeTokens, HttpTokenExchanger};

const OP_QUERY: &str = "query";
const OP_METADATA: &str = "metadata";
const OP_LIST_OBJECTS: &str = "list_objects";

#[derive(Debug, Clone, Serialize)]
pub struct ObjectList {
    pub objects: Vec<Value>,
    pub object_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub success: bool,
    pub instance_url: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub query: String,
    pub success: bool,
    pub result: Option<QueryResult>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub status: BatchStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItem>,
}

pub struct QueryForwarder<E: ExchangeTokens = HttpTokenExchanger> {
    manager: Arc<TokenManager<E>>,
    client: Client,
    config: QueryConfig,
    metrics: Arc<Metrics>,
}

impl<E: ExchangeTokens> QueryForwarder<E> {
    pub fn new(manager: Arc<TokenManager<E>>, client: Client, config: QueryConfig, metrics: Arc<Metrics>) -> Self {
        Self { manager, client, config, metrics }
    }

    pub async fn execute_query(&self, sql: &str) -> BrokerResult<QueryResult> {
        info!(query = sql, "executing query");
        let start = get_instant();
        let body = self
            .call(OP_QUERY, |client, base_url| {
                client
                    .post(format!("{}{}", base_url, self.config.query_path))
                    .json(&json!({ "sql": sql }))
            })
            .await?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let result = normalize_query_response(sql, &body, elapsed_ms)
            .inspect_err(|e| self.record_failure(OP_QUERY, e))?;
        info!(
            record_count = result.records.len(),
            total_size = result.total_size,
            execution_time_ms = elapsed_ms,
            "query executed"
        );
        Ok(result)
    }

    /// Schema of one data object, passed through as returned.
    pub async fn get_object_metadata(&self, object_name: &str) -> BrokerResult<Value> {
        validate_object_name(object_name)?;
        let body = self
            .call(OP_METADATA, |client, base_url| {
                client.get(format!("{}{}/{}", base_url, self.config.metadata_path, object_name))
            })
            .await?;
        parse_json(&body).inspect_err(|e| self.record_failure(OP_METADATA, e))
    }

    pub async fn list_objects(&self) -> BrokerResult<ObjectList> {
        let body = self
            .call(OP_LIST_OBJECTS, |client, base_url| {
                client.get(format!("{}{}", base_url, self.config.metadata_path))
            })
            .await?;
        let value = parse_json(&body).inspect_err(|e| self.record_failure(OP_LIST_OBJECTS, e))?;

        let objects = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("objects").or_else(|| map.remove("metadata")) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(ObjectList { object_count: objects.len(), objects })
    }

    /// Authenticate and list objects; failures are reported, not returned.
    pub async fn test_connection(&self) -> ConnectionStatus {
        let instance_url = match self.manager.get_valid_downstream_token().await {
            Ok((_, base_url)) => base_url,
            Err(e) => {
                warn!("connection test failed during authentication: {}", e);
                return ConnectionStatus {
                    success: false,
                    instance_url: None,
                    message: format!("connection test failed: {}", e),
                };
            }
        };

        match self.list_objects().await {
            Ok(_) => ConnectionStatus {
                success: true,
                instance_url: Some(instance_url),
                message: "successfully connected to the data platform".to_string(),
            },
            Err(e) => ConnectionStatus {
                success: false,
                instance_url: Some(instance_url),
                message: format!("connection test failed: {}", e),
            },
        }
    }

    /// Run each query through `execute_query`, one after another.
    pub async fn execute_batch(&self, queries: &[String]) -> BatchResult {
        let mut items = Vec::with_capacity(queries.len());
        for query in queries {
            let item = match self.execute_query(query).await {
                Ok(result) => BatchItem {
                    query: query.clone(),
                    success: true,
                    result: Some(result),
                    error: None,
                    error_code: None,
                },
                Err(e) => BatchItem {
                    query: query.clone(),
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                    error_code: Some(e.error_code()),
                },
            };
            items.push(item);
        }

        let succeeded = items.iter().filter(|i| i.success).count();
        let failed = items.len() - succeeded;
        let status = match (succeeded, failed) {
            (_, 0) => BatchStatus::Success,
            (0, _) => BatchStatus::Error,
            _ => BatchStatus::Partial,
        };
        info!(succeeded, failed, "batch finished");
        BatchResult { status, succeeded, failed, items }
    }

    /// One authenticated call; returns the raw body of a 2xx answer.
    async fn call<F>(&self, operation: &str, build: F) -> BrokerResult<String>
    where
        F: FnOnce(&Client, &str) -> RequestBuilder,
    {
        let start = get_instant();
        self.metrics.query_requests.with_label_values(&[operation]).inc();

        let result = async {
            let (token, base_url) = self.manager.get_valid_downstream_token().await?;
            let response = build(&self.client, &base_url)
                .bearer_auth(token)
                .header(http::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| BrokerError::from_transport(ExchangeStage::Query, e))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| BrokerError::from_transport(ExchangeStage::Query, e))?;
            if !status.is_success() {
                return Err(BrokerError::Query { status_code: status.as_u16(), body });
            }
            Ok(body)
        }
        .await;

        self.metrics
            .query_duration
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            self.record_failure(operation, e);
        }
        result
    }

    fn record_failure(&self, operation: &str, err: &BrokerError) {
        error!(operation, "relayed call failed: {}", err);
        self.metrics
            .query_failures
            .with_label_values(&[operation, err.reason()])
            .inc();
    }
}

fn parse_json(body: &str) -> BrokerResult<Value> {
    serde_json::from_str(body).map_err(|e| BrokerError::InvalidResponse {
        stage: ExchangeStage::Query,
        reason: e.to_string(),
    })
}

/// Object API names are path segments: letters, digits and underscores only.
fn validate_object_name(name: &str) -> BrokerResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(BrokerError::Validation(format!("invalid object name '{}'", name)));
    }
    Ok(())
}
