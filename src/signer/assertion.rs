//! Signed identity assertions for the JWT bearer grant.
//!
//! An assertion is built per exchange attempt and dropped right after the
//! call. The private key is parsed once, on first use or through
//! [`AssertionSigner::preload`], and then held for the process lifetime.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::config::credentials::CredentialsConfig;
use crate::errors::{BrokerError, BrokerResult};
use crate::helpers::time::Clock;

/// Prefix marking a base64 encoded HMAC secret in the key file.
const BASE64_SECRET_PREFIX: &str = "base64:";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

/// Opaque signed assertion. Never logged, never cached.
pub struct SignedAssertion(String);

impl SignedAssertion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignedAssertion(<redacted>)")
    }
}

pub struct AssertionSigner {
    credentials: Arc<CredentialsConfig>,
    algorithm: Algorithm,
    key: OnceCell<EncodingKey>,
    clock: Arc<dyn Clock>,
}

impl AssertionSigner {
    /// Fails with `Configuration` when the configured algorithm is unknown.
    pub fn new(credentials: Arc<CredentialsConfig>, clock: Arc<dyn Clock>) -> BrokerResult<Self> {
        let algorithm = parse_algorithm(&credentials.algorithm)?;
        Ok(Self {
            credentials,
            algorithm,
            key: OnceCell::new(),
            clock,
        })
    }

    /// Load and parse the key now instead of on the first exchange.
    pub async fn preload(&self) -> BrokerResult<()> {
        self.encoding_key().await.map(|_| ())
    }

    pub async fn sign_assertion(&self, audience: Option<&str>) -> BrokerResult<SignedAssertion> {
        let key = self.encoding_key().await?;

        let now = self.clock.now();
        let claims = AssertionClaims {
            iss: self.credentials.client_id.clone(),
            sub: self.credentials.username.clone(),
            aud: audience
                .map(str::to_owned)
                .unwrap_or_else(|| self.credentials.login_url.clone()),
            exp: now + self.credentials.assertion_lifetime_seconds() as i64,
            iat: now,
        };

        let token = encode(&Header::new(self.algorithm), &claims, key).map_err(|e| {
            error!("failed to sign assertion: {}", e);
            BrokerError::Signing(e.to_string())
        })?;

        debug!(
            iss = %claims.iss,
            sub = %claims.sub,
            aud = %claims.aud,
            exp = claims.exp,
            "assertion signed"
        );
        Ok(SignedAssertion(token))
    }

    async fn encoding_key(&self) -> BrokerResult<&EncodingKey> {
        self.key
            .get_or_try_init(|| async {
                let path = Path::new(&self.credentials.private_key_path);
                let key_data = tokio::fs::read(path).await.map_err(|e| {
                    error!(key_path = %path.display(), "failed to read private key: {}", e);
                    BrokerError::Configuration(format!(
                        "cannot read private key '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                let key = create_encoding_key(&key_data, self.algorithm)?;
                debug!(key_path = %path.display(), "private key loaded");
                Ok(key)
            })
            .await
    }
}

/// Map a configured algorithm name onto `jsonwebtoken`'s algorithm.
pub fn parse_algorithm(alg: &str) -> BrokerResult<Algorithm> {
    match alg.trim().to_uppercase().as_str() {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "PS256" => Ok(Algorithm::PS256),
        "PS384" => Ok(Algorithm::PS384),
        "PS512" => Ok(Algorithm::PS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(BrokerError::Configuration(format!(
            "unsupported signing algorithm '{}'",
            other
        ))),
    }
}

/// Parse key material for the algorithm. Never falls back to a generated key.
fn create_encoding_key(key_data: &[u8], algorithm: Algorithm) -> BrokerResult<EncodingKey> {
    let invalid = |kind: &str, e: jsonwebtoken::errors::Error| {
        BrokerError::Configuration(format!("invalid {} private key: {}", kind, e))
    };

    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => EncodingKey::from_rsa_pem(key_data).map_err(|e| invalid("RSA", e)),
        Algorithm::ES256 | Algorithm::ES384 => {
            EncodingKey::from_ec_pem(key_data).map_err(|e| invalid("EC", e))
        }
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let raw = std::str::from_utf8(key_data)
                .map_err(|_| BrokerError::Configuration("HMAC secret must be UTF-8".into()))?
                .trim();
            if raw.is_empty() {
                return Err(BrokerError::Configuration("HMAC secret is empty".into()));
            }
            match raw.strip_prefix(BASE64_SECRET_PREFIX) {
                Some(encoded) => STANDARD
                    .decode(encoded)
                    .map(|bytes| EncodingKey::from_secret(&bytes))
                    .map_err(|e| {
                        BrokerError::Configuration(format!("invalid base64 HMAC secret: {}", e))
                    }),
                None => Ok(EncodingKey::from_secret(raw.as_bytes())),
            }
        }
        other => Err(BrokerError::Configuration(format!(
            "unsupported signing algorithm '{:?}'",
            other
        ))),
    }
}
