// Concurrent callers share one refresh; slow endpoints surface as timeouts.

#[cfg(test)]
mod test {

    use std::time::Duration;

    use crate::errors::{BrokerError, ExchangeStage};
    use crate::tests::common::{
        build_reqwest_client_with_timeout, FakeOrg, FakeTokenEndpoint, Harness, Scripted,
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_trigger_one_exchange_per_kind() {
        let instance = FakeTokenEndpoint::spawn(vec![
            Scripted::token("D1", 1800, None).delayed(Duration::from_millis(150)),
        ])
        .await;
        let login = FakeTokenEndpoint::spawn(vec![
            Scripted::token("P1", 3600, Some(&instance.url())).delayed(Duration::from_millis(150)),
        ])
        .await;
        let org = FakeOrg { login, instance };
        let h = Harness::new(org.credentials());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = h.manager.clone();
                tokio::spawn(async move { manager.get_valid_downstream_token().await })
            })
            .collect();

        for task in tasks {
            let (token, _) = task.await.unwrap().unwrap();
            assert_eq!(token, "D1");
        }
        assert_eq!(org.login.calls(), 1);
        assert_eq!(org.instance.calls(), 1);

        org.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_primary_and_downstream_callers_share_the_primary() {
        let org = FakeOrg::spawn(&[("P1", 3600)], &[("D1", 1800)]).await;
        let h = Harness::new(org.credentials());

        let primary = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.get_valid_primary_token().await })
        };
        let downstream = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.get_valid_downstream_token().await })
        };

        assert_eq!(primary.await.unwrap().unwrap(), "P1");
        assert_eq!(downstream.await.unwrap().unwrap().0, "D1");
        assert_eq!(org.login.calls(), 1);
        assert_eq!(org.instance.calls(), 1);

        org.shutdown();
    }

    #[tokio::test]
    async fn slow_login_endpoint_times_out() {
        let org = FakeOrg::spawn(&[], &[]).await;
        org.login.push(Scripted::token("P1", 3600, None).delayed(Duration::from_secs(3)));
        let h = Harness::with_client(
            org.credentials(),
            build_reqwest_client_with_timeout(Duration::from_millis(500)),
        );

        let err = h.manager.get_valid_primary_token().await.unwrap_err();
        assert!(
            matches!(err, BrokerError::Timeout { stage: ExchangeStage::Primary }),
            "got {err:?}"
        );
        assert!(!h.manager.get_token_info().await.primary.has_token);

        org.shutdown();
    }

    #[tokio::test]
    async fn failed_refresh_releases_the_lock() {
        let org = FakeOrg::spawn(&[], &[("D1", 1800)]).await;
        org.login.push(Scripted::error(http::StatusCode::SERVICE_UNAVAILABLE, "maintenance"));
        let h = Harness::new(org.credentials());

        assert!(h.manager.get_valid_downstream_token().await.is_err());

        org.login.push(Scripted::token("P1", 3600, Some(&org.instance.url())));
        let (token, _) = tokio::time::timeout(Duration::from_secs(5), h.manager.get_valid_downstream_token())
            .await
            .expect("second call must not block")
            .unwrap();
        assert_eq!(token, "D1");

        org.shutdown();
    }
}
