// tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::Form;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use http::StatusCode;
use reqwest::Client;

use crate::config::credentials::CredentialsConfig;
use crate::config::service::{QueryConfig, SecurityConfig, ServiceConfig};
use crate::config::settings::{HttpConfig, MetricsConfig, ServerConfig, SettingsConfig};
use crate::helpers::time::{now_i64, ManualClock};
use crate::manager::lifecycle::TokenManager;
use crate::observability::metrics::Metrics;
use crate::signer::assertion::{AssertionClaims, AssertionSigner};
use crate::sources::exchange::HttpTokenExchanger;

pub const RSA_TEST_KEY_PEM: &str = include_str!("../../../fixtures/test_rsa_key.pem");
pub const RSA_TEST_PUBLIC_KEY_PEM: &str = include_str!("../../../fixtures/test_rsa_key.pub.pem");
pub const TOKEN_PATH: &str = "/services/oauth2/token";

pub fn fixture_key_path() -> String {
    format!("{}/fixtures/test_rsa_key.pem", env!("CARGO_MANIFEST_DIR"))
}

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    build_reqwest_client_with_timeout(Duration::from_secs(5))
}

pub fn build_reqwest_client_with_timeout(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().expect("reqwest client")
}

pub fn credentials_for(login_url: &str, key_path: &Path, algorithm: &str) -> CredentialsConfig {
    CredentialsConfig {
        client_id: "test-client-id".to_string(),
        username: "integration@example.com".to_string(),
        private_key_path: key_path.display().to_string(),
        login_url: login_url.to_string(),
        algorithm: algorithm.to_string(),
        assertion_lifetime_minutes: 3,
        refresh_threshold_seconds: Some(60),
        refresh_threshold_minutes: None,
        dataspace: None,
        downstream_token_path: TOKEN_PATH.to_string(),
    }
}

/// Claims of a compact JWS, without checking the signature.
pub fn decode_claims(jwt: &str) -> AssertionClaims {
    let payload = jwt.split('.').nth(1).expect("jwt payload segment");
    let bytes = URL_SAFE_NO_PAD.decode(payload).expect("base64url payload");
    serde_json::from_slice(&bytes).expect("assertion claims")
}

pub fn service_config_for(credentials: CredentialsConfig) -> ServiceConfig {
    ServiceConfig {
        settings: SettingsConfig {
            metrics: MetricsConfig { path: "/metrics".to_string(), is_enabled: true },
            server: ServerConfig { host: "127.0.0.1".to_string(), port: "0".to_string() },
            logging: None,
            http: HttpConfig { timeout_seconds: 5 },
            environment: "development".to_string(),
        },
        credentials,
        query: QueryConfig::default(),
        security: SecurityConfig::default(),
    }
}

/// Token manager wired to real HTTP exchanges and a manual clock.
pub struct Harness {
    pub manager: Arc<TokenManager>,
    pub clock: ManualClock,
    pub metrics: Arc<Metrics>,
    pub client: Client,
    pub t0: i64,
}

impl Harness {
    pub fn new(credentials: CredentialsConfig) -> Self {
        Self::with_client(credentials, build_reqwest_client())
    }

    pub fn with_client(credentials: CredentialsConfig, client: Client) -> Self {
        let t0 = now_i64();
        let clock = ManualClock::new(t0);
        let metrics = Metrics::new().expect("metrics");
        let credentials = Arc::new(credentials);
        let signer = AssertionSigner::new(credentials.clone(), Arc::new(clock.clone())).expect("signer");
        let exchanger = HttpTokenExchanger::new(
            client.clone(),
            credentials.clone(),
            Arc::new(clock.clone()),
            metrics.clone(),
        );
        let manager = Arc::new(TokenManager::new(
            signer,
            exchanger,
            credentials,
            Arc::new(clock.clone()),
            metrics.clone(),
        ));
        Self { manager, clock, metrics, client, t0 }
    }

    /// Move the manual clock to `t0 + offset` seconds.
    pub fn at(&self, offset: i64) {
        self.clock.set(self.t0 + offset);
    }
}

/// One scripted answer of a [`FakeTokenEndpoint`].
#[derive(Clone, Debug)]
pub struct Scripted {
    pub status: StatusCode,
    pub body: serde_json::Value,
    pub delay: Duration,
}

impl Scripted {
    pub fn token(access_token: &str, expires_in: u64, instance_url: Option<&str>) -> Self {
        let mut body = json!({
            "access_token": access_token,
            "expires_in": expires_in,
            "token_type": "Bearer",
        });
        if let Some(url) = instance_url {
            body["instance_url"] = json!(url);
        }
        Self { status: StatusCode::OK, body, delay: Duration::ZERO }
    }

    pub fn error(status: StatusCode, error: &str) -> Self {
        Self {
            status,
            body: json!({ "error": error, "error_description": "rejected by test server" }),
            delay: Duration::ZERO,
        }
    }

    pub fn raw(body: serde_json::Value) -> Self {
        Self { status: StatusCode::OK, body, delay: Duration::ZERO }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct FakeState {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    forms: Mutex<Vec<HashMap<String, String>>>,
    calls: AtomicUsize,
}

/// Token endpoint that answers from a script and records every form it receives.
///
/// Answers are consumed in order; the last one keeps being repeated.
#[derive(Clone)]
pub struct FakeTokenEndpoint {
    state: Arc<FakeState>,
    pub addr: SocketAddr,
    handle: Arc<JoinHandle<()>>,
}

impl FakeTokenEndpoint {
    pub async fn spawn(script: Vec<Scripted>) -> Self {
        let state = Arc::new(FakeState::default());
        *state.script.lock().unwrap() = script.into();

        let router = Router::new()
            .route(TOKEN_PATH, post(answer))
            .with_state(state.clone());
        let (handle, addr) = spawn_axum(router).await;
        Self { state, addr, handle: Arc::new(handle) }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue more answers behind the current script.
    pub fn push(&self, answer: Scripted) {
        self.state.script.lock().unwrap().push_back(answer);
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn forms(&self) -> Vec<HashMap<String, String>> {
        self.state.forms.lock().unwrap().clone()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn answer(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    state.calls.fetch_add(1, Ordering::SeqCst);
    state.forms.lock().unwrap().push(form);

    let next = {
        let mut script = state.script.lock().unwrap();
        let mut last = state.last.lock().unwrap();
        if let Some(answer) = script.pop_front() {
            *last = Some(answer);
        }
        last.clone()
    };

    match next {
        Some(answer) => {
            if !answer.delay.is_zero() {
                tokio::time::sleep(answer.delay).await;
            }
            (answer.status, answer.body.to_string())
        }
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no scripted answer".to_string()),
    }
}

/// Login and instance endpoints wired together: the primary answer points
/// at the instance server.
pub struct FakeOrg {
    pub login: FakeTokenEndpoint,
    pub instance: FakeTokenEndpoint,
}

impl FakeOrg {
    /// `primary` answers are (token, expires_in); `downstream` the same.
    pub async fn spawn(primary: &[(&str, u64)], downstream: &[(&str, u64)]) -> Self {
        let instance = FakeTokenEndpoint::spawn(
            downstream
                .iter()
                .map(|(token, expires_in)| Scripted::token(token, *expires_in, None))
                .collect(),
        )
        .await;
        let instance_url = instance.url();
        let login = FakeTokenEndpoint::spawn(
            primary
                .iter()
                .map(|(token, expires_in)| Scripted::token(token, *expires_in, Some(&instance_url)))
                .collect(),
        )
        .await;
        Self { login, instance }
    }

    pub fn credentials(&self) -> CredentialsConfig {
        credentials_for(&self.login.url(), Path::new(&fixture_key_path()), "RS256")
    }

    pub fn shutdown(&self) {
        self.login.shutdown();
        self.instance.shutdown();
    }
}
