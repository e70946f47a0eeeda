use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use tracing::info;

use crate::config::service::ServiceConfig;
use crate::helpers::time::{Clock, SystemClock};
use crate::manager::lifecycle::TokenManager;
use crate::observability::metrics::Metrics;
use crate::query::forwarder::QueryForwarder;
use crate::signer::assertion::AssertionSigner;
use crate::sources::exchange::{ExchangeTokens, HttpTokenExchanger};

/// Everything a request handler needs, built once at startup.
pub struct BrokerContext<E: ExchangeTokens = HttpTokenExchanger> {
    pub config: ServiceConfig,
    pub manager: Arc<TokenManager<E>>,
    pub forwarder: QueryForwarder<E>,
    pub metrics: Arc<Metrics>,
}

impl BrokerContext<HttpTokenExchanger> {
    pub fn build(config: ServiceConfig) -> Result<Arc<Self>> {
        let metrics = Metrics::new().map_err(|e| anyhow!("cannot register metrics: {}", e))?;
        Self::build_with(config, Arc::new(SystemClock), metrics)
    }

    pub fn build_with(config: ServiceConfig, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.settings.http.timeout_seconds))
            .build()
            .map_err(|e| anyhow!("cannot build http client: {}", e))?;

        let credentials = Arc::new(config.credentials.clone());
        let signer = AssertionSigner::new(credentials.clone(), clock.clone())?;
        let exchanger = HttpTokenExchanger::new(client.clone(), credentials.clone(), clock.clone(), metrics.clone());
        let manager = Arc::new(TokenManager::new(signer, exchanger, credentials, clock, metrics.clone()));

        Ok(Self::from_parts(config, manager, client, metrics))
    }
}

impl<E: ExchangeTokens> BrokerContext<E> {
    pub fn from_parts(
        config: ServiceConfig,
        manager: Arc<TokenManager<E>>,
        client: Client,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let forwarder = QueryForwarder::new(manager.clone(), client, config.query.clone(), metrics.clone());
        info!(
            login_url = %config.credentials.login_url,
            dataspace = ?config.credentials.dataspace,
            "broker context ready"
        );
        Arc::new(Self { config, manager, forwarder, metrics })
    }
}
