//! Token lifecycle manager.
//!
//! Single entry point for "give me a valid token". Each token kind is either
//! FRESH (cached and outside its refresh threshold) or STALE, and a stale
//! token is replaced on demand:
//!
//! - primary: sign an assertion, exchange it, store the result;
//! - downstream: obtain a FRESH primary token, exchange it, store the result.
//!
//! A downstream record remembers the primary generation it was built from, so
//! replacing the primary token always forces a new downstream exchange.
//!
//! Refreshes are serialised per kind by a mutex held across the
//! check-then-refresh sequence (lock order: downstream, then primary). Waiters
//! re-check the cache once they hold the lock and reuse whatever the previous
//! holder published. Nothing is written to the cache unless an exchange fully
//! succeeded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::token::{TokenKind, TokenRecord};
use crate::cache::token_cache::TokenCache;
use crate::config::credentials::CredentialsConfig;
use crate::errors::BrokerResult;
use crate::helpers::time::Clock;
use crate::observability::metrics::Metrics;
use crate::signer::assertion::AssertionSigner;
use crate::sources::exchange::{ExchangeTokens, HttpTokenExchanger};

/// Health view of one token kind.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenStatus {
    pub has_token: bool,
    /// lifetime reported by the provider when the token was issued
    pub expires_in: Option<u64>,
    pub remaining_seconds: Option<u64>,
    pub is_fresh: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TokenInfo {
    pub primary: TokenStatus,
    pub downstream: TokenStatus,
    pub last_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyState {
    Healthy,
    Unhealthy,
}

/// Reachability of the two token endpoints, as seen by obtaining tokens.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DependencyHealth {
    pub primary_auth: DependencyState,
    pub downstream_auth: DependencyState,
}

impl DependencyHealth {
    pub fn all_healthy(&self) -> bool {
        self.primary_auth == DependencyState::Healthy && self.downstream_auth == DependencyState::Healthy
    }
}

pub struct TokenManager<E: ExchangeTokens = HttpTokenExchanger> {
    signer: AssertionSigner,
    exchanger: E,
    credentials: Arc<CredentialsConfig>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    cache: RwLock<TokenCache>,
    primary_refresh: Mutex<()>,
    downstream_refresh: Mutex<()>,
}

impl<E: ExchangeTokens> TokenManager<E> {
    pub fn new(
        signer: AssertionSigner,
        exchanger: E,
        credentials: Arc<CredentialsConfig>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            signer,
            exchanger,
            credentials,
            clock,
            metrics,
            cache: RwLock::new(TokenCache::new()),
            primary_refresh: Mutex::new(()),
            downstream_refresh: Mutex::new(()),
        }
    }

    pub fn signer(&self) -> &AssertionSigner {
        &self.signer
    }

    pub async fn get_valid_primary_token(&self) -> BrokerResult<String> {
        self.ensure_primary().await.map(|record| record.access_token)
    }

    /// Returns the downstream access token and the base URL to query with it.
    pub async fn get_valid_downstream_token(&self) -> BrokerResult<(String, String)> {
        if let Some(record) = self.cached(TokenKind::Downstream).await {
            return Ok(self.downstream_pair(record));
        }

        let _guard = self.downstream_refresh.lock().await;
        if let Some(record) = self.cached(TokenKind::Downstream).await {
            return Ok(self.downstream_pair(record));
        }

        let primary = self.ensure_primary().await?;
        let primary_base_url = normalize_base_url(
            primary
                .instance_url
                .as_deref()
                .unwrap_or(&self.credentials.login_url),
        );

        let mut record = self
            .exchanger
            .exchange_primary_for_downstream_token(
                &primary.access_token,
                &primary_base_url,
                self.credentials.dataspace.as_deref(),
            )
            .await?;
        record.primary_generation = primary.primary_generation;
        if record.instance_url.is_none() {
            record.instance_url = Some(primary_base_url);
        }
        self.warn_if_short_lived(TokenKind::Downstream, &record);

        self.cache.write().await.store(TokenKind::Downstream, record.clone());
        self.metrics.token_refreshes.with_label_values(&[TokenKind::Downstream.as_str()]).inc();
        info!(
            expires_in = record.expires_in,
            primary_generation = record.primary_generation,
            "downstream token refreshed"
        );
        Ok(self.downstream_pair(record))
    }

    /// Drop both tokens; the next request runs the full exchange again.
    pub async fn invalidate_all(&self) {
        let _downstream = self.downstream_refresh.lock().await;
        let _primary = self.primary_refresh.lock().await;
        self.cache.write().await.clear(None);
        info!("cleared cached authentication tokens");
    }

    pub async fn get_token_info(&self) -> TokenInfo {
        let now = self.clock.now();
        let threshold = self.credentials.refresh_threshold_seconds();
        let cache = self.cache.read().await;

        let status = |kind: TokenKind| {
            let record = cache.get(kind);
            TokenStatus {
                has_token: record.is_some(),
                expires_in: record.map(|r| r.expires_in),
                remaining_seconds: record.map(|r| r.remaining_seconds(now)),
                is_fresh: cache.is_fresh(kind, threshold, now),
            }
        };

        TokenInfo {
            primary: status(TokenKind::Primary),
            downstream: status(TokenKind::Downstream),
            last_refresh: cache
                .last_refresh()
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        }
    }

    /// Obtain both tokens, reusing FRESH ones. A failed primary exchange
    /// marks both dependencies unhealthy since the downstream one was never reached.
    pub async fn check_dependencies(&self) -> DependencyHealth {
        if let Err(e) = self.get_valid_primary_token().await {
            warn!("primary auth health check failed: {}", e);
            return DependencyHealth {
                primary_auth: DependencyState::Unhealthy,
                downstream_auth: DependencyState::Unhealthy,
            };
        }
        let downstream_auth = match self.get_valid_downstream_token().await {
            Ok(_) => DependencyState::Healthy,
            Err(e) => {
                warn!("downstream auth health check failed: {}", e);
                DependencyState::Unhealthy
            }
        };
        DependencyHealth { primary_auth: DependencyState::Healthy, downstream_auth }
    }

    async fn ensure_primary(&self) -> BrokerResult<TokenRecord> {
        if let Some(record) = self.cached(TokenKind::Primary).await {
            return Ok(record);
        }

        let _guard = self.primary_refresh.lock().await;
        if let Some(record) = self.cached(TokenKind::Primary).await {
            return Ok(record);
        }

        let assertion = self.signer.sign_assertion(None).await?;
        let record = self
            .exchanger
            .exchange_assertion_for_primary_token(&assertion)
            .await?;
        drop(assertion);
        self.warn_if_short_lived(TokenKind::Primary, &record);

        let stored = self.cache.write().await.store(TokenKind::Primary, record).clone();

        self.metrics.token_refreshes.with_label_values(&[TokenKind::Primary.as_str()]).inc();
        info!(
            expires_in = stored.expires_in,
            primary_generation = stored.primary_generation,
            "primary token refreshed"
        );
        Ok(stored)
    }

    /// FRESH record of `kind`, if any. Counts as a cache hit.
    async fn cached(&self, kind: TokenKind) -> Option<TokenRecord> {
        let now = self.clock.now();
        let threshold = self.credentials.refresh_threshold_seconds();
        let cache = self.cache.read().await;
        if !cache.is_fresh(kind, threshold, now) {
            return None;
        }
        let record = cache.get(kind).cloned();
        if record.is_some() {
            debug!(kind = kind.as_str(), "using cached token");
            self.metrics.token_cache_hits.with_label_values(&[kind.as_str()]).inc();
        }
        record
    }

    fn downstream_pair(&self, record: TokenRecord) -> (String, String) {
        let base_url = record
            .instance_url
            .as_deref()
            .map(normalize_base_url)
            .unwrap_or_else(|| normalize_base_url(&self.credentials.login_url));
        (record.access_token, base_url)
    }

    fn warn_if_short_lived(&self, kind: TokenKind, record: &TokenRecord) {
        let threshold = self.credentials.refresh_threshold_seconds();
        if record.expires_in <= threshold {
            warn!(
                kind = kind.as_str(),
                expires_in = record.expires_in,
                threshold,
                "token lifetime does not exceed the refresh threshold, every request will refresh it"
            );
        }
    }
}

/// Instance URLs sometimes come back without a scheme.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
