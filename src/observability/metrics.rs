use std::sync::Arc;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};
use tracing::info;

/// Broker metrics. Built once at startup and shared through the context.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Token exchange metrics
    pub token_exchange_requests: IntCounterVec,
    pub token_exchange_failures: IntCounterVec,
    pub token_exchange_duration: HistogramVec,

    // Cache metrics
    pub token_cache_hits: IntCounterVec,
    pub token_refreshes: IntCounterVec,

    // Query relay metrics
    pub query_requests: IntCounterVec,
    pub query_failures: IntCounterVec,
    pub query_duration: HistogramVec,

    pub up: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Arc<Self>> {
        info!("Initializing Metrics ...");
        let registry = Registry::new_custom(Some("cdpbroker".into()), None)?;

        let metrics = Arc::new(Self {
            // Token exchange
            token_exchange_requests: IntCounterVec::new(Opts::new("token_exchange_requests_total", "Token exchange attempts by stage"), &["stage"])?,
            token_exchange_failures: IntCounterVec::new(Opts::new("token_exchange_failures_total", "Token exchange failures by stage and reason"), &["stage", "reason"])?,
            token_exchange_duration: HistogramVec::new(HistogramOpts::new("token_exchange_duration_seconds", "Token exchange duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]), &["stage"])?,

            // Cache
            token_cache_hits: IntCounterVec::new(Opts::new("token_cache_hits_total", "Requests served from the token cache"), &["kind"])?,
            token_refreshes: IntCounterVec::new(Opts::new("token_refreshes_total", "Successful token refreshes"), &["kind"])?,

            // Query relay
            query_requests: IntCounterVec::new(Opts::new("query_requests_total", "Relayed calls by operation"), &["operation"])?,
            query_failures: IntCounterVec::new(Opts::new("query_failures_total", "Relayed call failures by operation and reason"), &["operation", "reason"])?,
            query_duration: HistogramVec::new(HistogramOpts::new("query_duration_seconds", "Relayed call duration seconds").buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]), &["operation"])?,

            up: IntGauge::new("up", "1 if service is serving")?,

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.token_exchange_requests.clone()))?;
        reg.register(Box::new(metrics.token_exchange_failures.clone()))?;
        reg.register(Box::new(metrics.token_exchange_duration.clone()))?;
        reg.register(Box::new(metrics.token_cache_hits.clone()))?;
        reg.register(Box::new(metrics.token_refreshes.clone()))?;
        reg.register(Box::new(metrics.query_requests.clone()))?;
        reg.register(Box::new(metrics.query_failures.clone()))?;
        reg.register(Box::new(metrics.query_duration.clone()))?;
        reg.register(Box::new(metrics.up.clone()))?;

        Ok(metrics)
    }
}
