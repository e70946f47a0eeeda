//! Reshape query API answers into [`QueryResult`].
//!
//! The query API answers in one of two shapes:
//!
//! - rows as arrays: `data: [[..], ..]` plus `metadata: {column: {placeInOrder, type}}`
//!   and `rowCount`;
//! - rows as objects: `records: [{..}, ..]` plus `totalSize`, `done` and
//!   `nextRecordsUrl`.
//!
//! Both become a list of column-name → value records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{BrokerError, BrokerResult, ExchangeStage};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: Option<String>,
}

/// Stable result schema handed back to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub query: String,
    pub records: Vec<Map<String, Value>>,
    pub total_size: u64,
    pub done: bool,
    pub next_records_url: Option<String>,
    pub columns: Vec<Column>,
    pub query_id: Option<String>,
    pub execution_time_ms: f64,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    #[serde(rename = "placeInOrder")]
    place_in_order: usize,
    #[serde(rename = "type", default)]
    data_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQueryResponse {
    #[serde(default)]
    data: Option<Vec<Value>>,
    #[serde(default)]
    metadata: Option<HashMap<String, ColumnMeta>>,
    #[serde(rename = "rowCount", default)]
    row_count: Option<u64>,
    #[serde(default)]
    records: Option<Vec<Map<String, Value>>>,
    #[serde(rename = "totalSize", default)]
    total_size: Option<u64>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(rename = "nextRecordsUrl", default)]
    next_records_url: Option<String>,
    #[serde(rename = "queryId", default)]
    query_id: Option<String>,
}

pub fn normalize_query_response(query: &str, body: &str, execution_time_ms: f64) -> BrokerResult<QueryResult> {
    let raw: RawQueryResponse = serde_json::from_str(body).map_err(|e| BrokerError::InvalidResponse {
        stage: ExchangeStage::Query,
        reason: e.to_string(),
    })?;

    let columns = ordered_columns(raw.metadata.unwrap_or_default());

    let records = match (raw.data, raw.records) {
        (Some(rows), _) => rows
            .into_iter()
            .map(|row| row_to_record(row, &columns))
            .collect::<BrokerResult<Vec<_>>>()?,
        (None, Some(records)) => records,
        (None, None) => Vec::new(),
    };

    let total_size = raw
        .row_count
        .or(raw.total_size)
        .unwrap_or(records.len() as u64);

    Ok(QueryResult {
        query: query.to_owned(),
        total_size,
        done: raw.done.unwrap_or(true),
        next_records_url: raw.next_records_url,
        columns,
        query_id: raw.query_id,
        execution_time_ms,
        records,
    })
}

fn ordered_columns(metadata: HashMap<String, ColumnMeta>) -> Vec<Column> {
    let mut cols: Vec<(usize, Column)> = metadata
        .into_iter()
        .map(|(name, meta)| (meta.place_in_order, Column { name, data_type: meta.data_type }))
        .collect();
    cols.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
    cols.into_iter().map(|(_, col)| col).collect()
}

fn row_to_record(row: Value, columns: &[Column]) -> BrokerResult<Map<String, Value>> {
    match row {
        Value::Object(map) => Ok(map),
        Value::Array(values) => Ok(values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let name = columns
                    .get(i)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| format!("column_{}", i));
                (name, v)
            })
            .collect()),
        other => Err(BrokerError::InvalidResponse {
            stage: ExchangeStage::Query,
            reason: format!("unexpected row shape: {}", other),
        }),
    }
}
