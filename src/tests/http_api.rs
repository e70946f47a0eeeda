// HTTP API served over a broker context whose upstreams are httpmock servers.

#[cfg(test)]
mod test {

    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;

    use httpmock::prelude::*;
    use serde_json::{json, Value};

    use crate::config::service::ServiceConfig;
    use crate::context::BrokerContext;
    use crate::helpers::time::SystemClock;
    use crate::observability::metrics::Metrics;
    use crate::server::server::{build_router, AppState};
    use crate::tests::common::{
        build_reqwest_client, credentials_for, fixture_key_path, service_config_for, spawn_axum,
        JoinHandle, TOKEN_PATH,
    };

    struct Api {
        login: MockServer,
        instance: MockServer,
        addr: SocketAddr,
        handle: JoinHandle<()>,
        context: Arc<BrokerContext>,
    }

    impl Api {
        async fn start(configure: impl FnOnce(&mut ServiceConfig)) -> Self {
            let login = MockServer::start_async().await;
            let instance = MockServer::start_async().await;

            let mut config = service_config_for(credentials_for(
                &login.base_url(),
                Path::new(&fixture_key_path()),
                "RS256",
            ));
            configure(&mut config);

            let context =
                BrokerContext::build_with(config, Arc::new(SystemClock), Metrics::new().unwrap()).unwrap();
            let (handle, addr) = spawn_axum(build_router(AppState::new(context.clone()))).await;
            Self { login, instance, addr, handle, context }
        }

        async fn grant_tokens(&self) {
            let instance_url = self.instance.base_url();
            self.login
                .mock_async(|when, then| {
                    when.method(POST).path(TOKEN_PATH);
                    then.status(200)
                        .json_body(json!({ "access_token": "P1", "expires_in": 3600, "instance_url": instance_url }));
                })
                .await;
            self.instance
                .mock_async(|when, then| {
                    when.method(POST).path(TOKEN_PATH);
                    then.status(200).json_body(json!({ "access_token": "D1", "expires_in": 1800 }));
                })
                .await;
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }
    }

    impl Drop for Api {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    #[tokio::test]
    async fn health_is_degraded_while_login_fails() {
        let api = Api::start(|_| {}).await;
        let client = build_reqwest_client();

        // login mock has no routes yet, every exchange gets a 404
        let resp = client.get(api.url("/health")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["dependencies"]["primary_auth"], "unhealthy");
        assert_eq!(body["dependencies"]["downstream_auth"], "unhealthy");
        assert_eq!(body["tokens"]["primary"]["has_token"], false);
        assert_eq!(body["tokens"]["downstream"]["is_fresh"], false);
    }

    #[tokio::test]
    async fn health_obtains_tokens_when_endpoints_answer() {
        let api = Api::start(|_| {}).await;
        api.grant_tokens().await;

        let body: Value = build_reqwest_client()
            .get(api.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["dependencies"]["primary_auth"], "healthy");
        assert_eq!(body["dependencies"]["downstream_auth"], "healthy");
        assert_eq!(body["tokens"]["downstream"]["is_fresh"], true);
    }

    #[tokio::test]
    async fn status_is_open_and_names_the_environment() {
        let api = Api::start(|cfg| {
            cfg.settings.environment = "staging".to_string();
            cfg.security.enable_api_key_validation = true;
            cfg.security.allowed_api_keys = vec!["secret-key".to_string()];
        })
        .await;

        let resp = build_reqwest_client().get(api.url("/status")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "operational");
        assert_eq!(body["environment"], "staging");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["timestamp"].is_string());
        // no token exchange behind /status
        assert!(!api.context.manager.get_token_info().await.primary.has_token);
    }

    #[tokio::test]
    async fn customer_lookups_are_served() {
        let api = Api::start(|_| {}).await;
        api.grant_tokens().await;
        api.instance
            .mock_async(|when, then| {
                when.method(POST).path("/api/v2/query").body_includes("FROM UnifiedIndividual__dlm");
                then.status(200).json_body(json!({ "records": [{ "Id": "0PK1" }], "done": true }));
            })
            .await;
        api.instance
            .mock_async(|when, then| {
                when.method(POST).path("/api/v2/query").body_includes("FROM Case__dlm");
                then.status(200).json_body(json!({ "records": [{ "CaseNumber": "0001", "Priority": "High" }] }));
            })
            .await;
        api.instance
            .mock_async(|when, then| {
                when.method(POST).path("/api/v2/query").body_includes("FROM LoyaltyMember__dmo");
                then.status(200).json_body(json!({ "records": [] }));
            })
            .await;
        let client = build_reqwest_client();

        let profile: Value = client
            .post(api.url("/api/v1/user-profile"))
            .json(&json!({ "email": "jane@example.com", "include_related_data": false }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(profile["status"], "success");
        assert_eq!(profile["data"]["profile"]["Id"], "0PK1");
        assert!(profile["data"]["related_data"].is_null());

        let cases: Value = client
            .post(api.url("/api/v1/cases"))
            .json(&json!({ "email": "jane@example.com", "status_filter": "Open" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cases["data"]["total_count"], 1);
        assert_eq!(cases["data"]["cases"][0]["IsHighPriority"], true);

        let loyalty: Value = client
            .post(api.url("/api/v1/loyalty"))
            .header("X-Correlation-ID", "corr-7")
            .json(&json!({ "email": "jane@example.com" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(loyalty["correlation_id"], "corr-7");
        assert_eq!(loyalty["data"]["loyalty_info"], json!({}));
        assert!(loyalty["data"]["transaction_history"].is_null());
    }

    #[tokio::test]
    async fn malformed_email_is_a_bad_request() {
        let api = Api::start(|_| {}).await;

        let resp = build_reqwest_client()
            .post(api.url("/api/v1/cases"))
            .json(&json!({ "email": "jane' OR '1'='1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(!api.context.manager.get_token_info().await.primary.has_token);
    }

    #[tokio::test]
    async fn query_round_trip_echoes_correlation_id() {
        let api = Api::start(|_| {}).await;
        api.grant_tokens().await;
        api.instance
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v2/query")
                    .json_body(json!({ "sql": "SELECT Id__c FROM UnifiedIndividual__dlm LIMIT 5" }));
                then.status(200).json_body(json!({ "records": [{ "Id__c": "001" }], "totalSize": 1, "done": true }));
            })
            .await;
        let client = build_reqwest_client();

        let resp = client
            .post(api.url("/api/v1/query"))
            .header("X-Correlation-ID", "corr-42")
            .json(&json!({ "query": "SELECT Id__c FROM UnifiedIndividual__dlm", "limit": 5 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-correlation-id"], "corr-42");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["correlation_id"], "corr-42");
        assert_eq!(body["data"]["records"][0]["Id__c"], "001");

        let health: Value = client.get(api.url("/health")).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["tokens"]["downstream"]["has_token"], true);
    }

    #[tokio::test]
    async fn unsafe_query_is_rejected_before_any_upstream_call() {
        let api = Api::start(|_| {}).await;
        let client = build_reqwest_client();

        let resp = client
            .post(api.url("/api/v1/query"))
            .json(&json!({ "query": "DROP TABLE UnifiedIndividual__dlm" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(!api.context.manager.get_token_info().await.primary.has_token);
    }

    #[tokio::test]
    async fn upstream_auth_failure_maps_to_bad_gateway() {
        let api = Api::start(|_| {}).await;
        api.login
            .mock_async(|when, then| {
                when.method(POST).path(TOKEN_PATH);
                then.status(401).json_body(json!({ "error": "invalid_grant" }));
            })
            .await;
        let client = build_reqwest_client();

        let resp = client
            .post(api.url("/api/v1/query"))
            .json(&json!({ "query": "SELECT 1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "authentication_failed");
    }

    #[tokio::test]
    async fn batch_limits_are_enforced() {
        let api = Api::start(|cfg| cfg.query.max_batch_size = 2).await;
        let client = build_reqwest_client();

        let queries: Vec<Value> = (0..3).map(|i| json!({ "query": format!("SELECT {i}") })).collect();
        let resp = client
            .post(api.url("/api/v1/query/batch"))
            .json(&json!({ "queries": queries }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn api_key_is_required_when_enabled() {
        let api = Api::start(|cfg| {
            cfg.security.enable_api_key_validation = true;
            cfg.security.allowed_api_keys = vec!["secret-key".to_string()];
        })
        .await;
        let client = build_reqwest_client();

        let missing = client.post(api.url("/api/v1/auth/invalidate")).send().await.unwrap();
        assert_eq!(missing.status(), 401);

        let wrong = client
            .post(api.url("/api/v1/auth/invalidate"))
            .header("X-API-Key", "guess")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 401);

        let ok = client
            .post(api.url("/api/v1/auth/invalidate"))
            .header("X-API-Key", "secret-key")
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);

        // health stays open
        let health = client.get(api.url("/health")).send().await.unwrap();
        assert_eq!(health.status(), 200);
    }

    #[tokio::test]
    async fn invalidate_endpoint_clears_tokens() {
        let api = Api::start(|_| {}).await;
        api.grant_tokens().await;
        api.context.manager.get_valid_downstream_token().await.unwrap();
        let client = build_reqwest_client();

        let resp = client.post(api.url("/api/v1/auth/invalidate")).send().await.unwrap();
        assert_eq!(resp.status(), 200);

        let info = api.context.manager.get_token_info().await;
        assert!(!info.primary.has_token);
        assert!(!info.downstream.has_token);
    }

    #[tokio::test]
    async fn metrics_are_exposed() {
        let api = Api::start(|_| {}).await;
        api.grant_tokens().await;
        api.context.manager.get_valid_downstream_token().await.unwrap();
        let client = build_reqwest_client();

        let resp = client.get(api.url("/metrics")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let text = resp.text().await.unwrap();
        assert!(text.contains("cdpbroker_token_exchange_requests_total"));
        assert!(text.contains("cdpbroker_token_refreshes_total{kind=\"downstream\"} 1"));
    }

    #[tokio::test]
    async fn metrics_route_absent_when_disabled() {
        let api = Api::start(|cfg| cfg.settings.metrics.is_enabled = false).await;
        let resp = build_reqwest_client().get(api.url("/metrics")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }
}
