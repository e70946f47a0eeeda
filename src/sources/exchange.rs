//! Outbound token exchanges.
//!
//! Two single-attempt form POSTs: signed assertion → primary token, primary
//! token → downstream token. The exchanger only returns records; storing them
//! is the lifecycle manager's business.

use std::future::Future;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::{error, info};

use crate::cache::token::TokenRecord;
use crate::config::credentials::CredentialsConfig;
use crate::errors::{BrokerError, BrokerResult, ExchangeStage};
use crate::helpers::time::{get_instant, Clock};
use crate::observability::metrics::Metrics;
use crate::signer::assertion::SignedAssertion;

pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Body of a successful token endpoint answer. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub instance_url: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

pub trait ExchangeTokens: Send + Sync + 'static {
    fn exchange_assertion_for_primary_token(
        &self,
        assertion: &SignedAssertion,
    ) -> impl Future<Output = BrokerResult<TokenRecord>> + Send;

    fn exchange_primary_for_downstream_token(
        &self,
        primary_access_token: &str,
        base_url: &str,
        dataspace: Option<&str>,
    ) -> impl Future<Output = BrokerResult<TokenRecord>> + Send;
}

pub struct HttpTokenExchanger {
    client: Client,
    credentials: Arc<CredentialsConfig>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl HttpTokenExchanger {
    /// `client` must carry the outbound timeout, every call relies on it.
    pub fn new(
        client: Client,
        credentials: Arc<CredentialsConfig>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { client, credentials, clock, metrics }
    }

    async fn post_form(
        &self,
        stage: ExchangeStage,
        url: &str,
        form: &[(&str, &str)],
    ) -> BrokerResult<TokenRecord> {
        let start = get_instant();
        let stage_label = stage.as_str();
        self.metrics.token_exchange_requests.with_label_values(&[stage_label]).inc();

        let result = self.send_form(stage, url, form).await;

        self.metrics
            .token_exchange_duration
            .with_label_values(&[stage_label])
            .observe(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            self.metrics
                .token_exchange_failures
                .with_label_values(&[stage_label, err.reason()])
                .inc();
            error!(stage = stage_label, url, "token exchange failed: {}", err);
        }
        result
    }

    async fn send_form(
        &self,
        stage: ExchangeStage,
        url: &str,
        form: &[(&str, &str)],
    ) -> BrokerResult<TokenRecord> {
        let issued_at = self.clock.now();
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| BrokerError::from_transport(stage, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::from_transport(stage, e))?;

        if !status.is_success() {
            return Err(BrokerError::AuthExchange {
                stage,
                status_code: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            BrokerError::InvalidResponse { stage, reason: e.to_string() }
        })?;
        if parsed.access_token.trim().is_empty() {
            return Err(BrokerError::InvalidResponse {
                stage,
                reason: "access_token is empty".to_string(),
            });
        }

        info!(
            stage = stage.as_str(),
            expires_in = parsed.expires_in,
            instance_url = ?parsed.instance_url,
            token_type = ?parsed.token_type,
            "token exchange succeeded"
        );
        Ok(TokenRecord::new(parsed.access_token, parsed.expires_in, issued_at, parsed.instance_url))
    }
}

impl ExchangeTokens for HttpTokenExchanger {
    async fn exchange_assertion_for_primary_token(
        &self,
        assertion: &SignedAssertion,
    ) -> BrokerResult<TokenRecord> {
        let url = self.credentials.primary_token_url();
        info!(url = %url, grant_type = JWT_BEARER_GRANT_TYPE, "requesting primary access token");
        let form = [
            ("grant_type", JWT_BEARER_GRANT_TYPE),
            ("assertion", assertion.as_str()),
        ];
        self.post_form(ExchangeStage::Primary, &url, &form).await
    }

    async fn exchange_primary_for_downstream_token(
        &self,
        primary_access_token: &str,
        base_url: &str,
        dataspace: Option<&str>,
    ) -> BrokerResult<TokenRecord> {
        let url = self.credentials.downstream_token_url(base_url);
        info!(url = %url, dataspace = ?dataspace, "exchanging primary token for downstream token");
        let mut form = vec![
            ("grant_type", JWT_BEARER_GRANT_TYPE),
            ("assertion", primary_access_token),
        ];
        if let Some(dataspace) = dataspace {
            form.push(("dataspace", dataspace));
        }
        self.post_form(ExchangeStage::Downstream, &url, &form).await
    }
}
