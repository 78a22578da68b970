//! End-to-end tests for the direct pathway against mock Amazon endpoints.
//!
//! One wiremock server plays both the Login with Amazon token endpoint
//! (`/auth/o2/token`) and the NA Ads API host.

use std::sync::Arc;

use ads_core::{
    provider, AdsClient, AdsRequest, AuthError, AuthManager, AuthStage, CacheState,
    DirectSettings, ProviderSettings, Region, RegionInfo, RegionRouter, SecretString, Settings,
    CLIENT_ID_HEADER, DIRECT_IDENTITY_ID, SCOPE_HEADER,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> Settings {
    Settings::new(ProviderSettings::Direct(DirectSettings {
        client_id: "X".to_string(),
        client_secret: SecretString::new("Y"),
        refresh_token: SecretString::new("Z"),
    }))
}

fn manager(server: &MockServer, settings: Settings) -> Arc<AuthManager> {
    let router = RegionRouter::with_endpoints(
        Region::Na,
        vec![RegionInfo::new(
            Region::Na,
            "North America",
            &server.uri(),
            &format!("{}/auth/o2/token", server.uri()),
        )],
    );
    let provider = provider::from_settings(&settings, router.clone()).unwrap();
    Arc::new(AuthManager::new(provider, router, settings).unwrap())
}

fn token_reply(access_token: &str, expires_in: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access_token,
        "refresh_token": "Z",
        "expires_in": expires_in,
        "token_type": "bearer"
    }))
}

async fn mount_token(server: &MockServer, access_token: &str, expires_in: i64, times: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(token_reply(access_token, expires_in))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

mod credentials {
    use super::*;

    #[tokio::test]
    async fn test_direct_identity_and_client_id_header() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|one", 3600, 1).await;
        let manager = manager(&server, settings());

        let identities = manager.list_identities(None).await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].id, DIRECT_IDENTITY_ID);

        manager
            .set_active_identity(None, &identities[0].id)
            .await
            .unwrap();
        let creds = manager.get_active_credentials(None).await.unwrap();
        assert_eq!(creds.headers[CLIENT_ID_HEADER], "X");
        assert_eq!(creds.base_url, server.uri());
        assert!(creds.expires_at > chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_cached_within_margin() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|one", 3600, 1).await;
        let manager = manager(&server, settings());

        let first = manager.get_active_credentials(None).await.unwrap();
        let second = manager.get_active_credentials(None).await.unwrap();
        assert_eq!(first.access_token, second.access_token);
    }

    #[tokio::test]
    async fn test_refreshed_after_expiry() {
        let server = MockServer::start().await;
        // 30s lifetime is already inside the 60s margin
        mount_token(&server, "Atza|one", 30, 1).await;
        mount_token(&server, "Atza|two", 3600, 1).await;
        let manager = manager(&server, settings());

        let first = manager.get_active_credentials(None).await.unwrap();
        let second = manager.get_active_credentials(None).await.unwrap();
        assert_eq!(first.access_token.expose(), "Atza|one");
        assert_eq!(second.access_token.expose(), "Atza|two");
        assert!(second.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn test_concurrent_callers_mint_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(
                token_reply("Atza|shared", 3600).set_delay(std::time::Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let manager = manager(&server, settings());

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_active_credentials(None).await })
            })
            .collect();

        for caller in futures::future::join_all(callers).await {
            let creds = caller.unwrap().unwrap();
            assert_eq!(creds.access_token.expose(), "Atza|shared");
        }
    }

    #[tokio::test]
    async fn test_rejected_mint_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/o2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "The request has an invalid grant parameter"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let manager = manager(&server, settings());

        let err = manager.get_active_credentials(None).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Rejected {
                stage: AuthStage::OAuthRefresh,
                ..
            }
        ));
        assert!(!err.is_transient());
        assert_eq!(
            manager.cache_state(None, DIRECT_IDENTITY_ID).await.unwrap(),
            CacheState::Empty
        );
    }
}

mod routing {
    use super::*;

    #[tokio::test]
    async fn test_region_override_and_clear() {
        let server = MockServer::start().await;
        let manager = manager(&server, settings());

        let default = manager.show_routing_state(None).await.unwrap();
        assert_eq!(default.region, Region::Na);

        manager.set_region_override(None, Region::Eu).await;
        let state = manager.show_routing_state(None).await.unwrap();
        assert!(state.host.contains("-eu"), "host was {}", state.host);

        manager.clear_region_override(None).await;
        let state = manager.show_routing_state(None).await.unwrap();
        assert_eq!(state.region, Region::Na);
        assert_eq!(state.host, default.host);
    }

    #[tokio::test]
    async fn test_override_is_session_scoped() {
        let server = MockServer::start().await;
        let manager = manager(&server, settings());

        manager.set_region_override(Some("session-a"), Region::Fe).await;
        let a = manager.show_routing_state(Some("session-a")).await.unwrap();
        let b = manager.show_routing_state(Some("session-b")).await.unwrap();
        assert!(a.host.contains("-fe"));
        assert_eq!(b.region, Region::Na);
    }
}

mod requests {
    use super::*;

    #[tokio::test]
    async fn test_caller_cannot_override_auth_headers() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|one", 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/profiles"))
            .and(header(CLIENT_ID_HEADER, "X"))
            .and(header("authorization", "Bearer Atza|one"))
            .and(header(SCOPE_HEADER, "12345"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        let manager = manager(&server, settings());
        let client = AdsClient::new(manager).unwrap();

        let request = AdsRequest::get("/v2/profiles")
            .with_header("amazon-advertising-api-clientid", "attacker")
            .with_header("Authorization", "Bearer stolen")
            .with_header("Amazon-Advertising-API-Scope", "999")
            .with_profile("12345");
        let response = client.send(None, &request).await.unwrap();
        assert_eq!(response.status, 200);

        let received = server.received_requests().await.unwrap();
        let api_call = received
            .iter()
            .find(|r| r.url.path() == "/v2/profiles")
            .unwrap();
        let client_ids: Vec<_> = api_call
            .headers
            .get_all("amazon-advertising-api-clientid")
            .iter()
            .collect();
        assert_eq!(client_ids.len(), 1);
        assert_eq!(client_ids[0], "X");
    }

    #[tokio::test]
    async fn test_401_remints_once_then_succeeds() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|stale", 3600, 1).await;
        mount_token(&server, "Atza|fresh", 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/profiles"))
            .and(header("authorization", "Bearer Atza|stale"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "UNAUTHORIZED",
                "details": "Not authorized to access this advertiser"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/profiles"))
            .and(header("authorization", "Bearer Atza|fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "profileId": 1, "countryCode": "US" }
            ])))
            .expect(1)
            .mount(&server)
            .await;
        let client = AdsClient::new(manager(&server, settings())).unwrap();

        let response = client
            .send(None, &AdsRequest::get("/v2/profiles"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.json().unwrap()[0]["countryCode"], "US");
    }

    #[tokio::test]
    async fn test_second_401_is_auth_error() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|one", 3600, 1).await;
        mount_token(&server, "Atza|two", 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/profiles"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        let client = AdsClient::new(manager(&server, settings())).unwrap();

        let err = client
            .send(None, &AdsRequest::get("/v2/profiles"))
            .await
            .unwrap_err();
        match err {
            AuthError::Rejected {
                identity, stage, ..
            } => {
                assert_eq!(identity, DIRECT_IDENTITY_ID);
                assert_eq!(stage, AuthStage::ApiRequest);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|one", 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/profiles"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;
        let client = AdsClient::new(manager(&server, settings())).unwrap();

        let err = client
            .send(None, &AdsRequest::get("/v2/profiles"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_errors_are_returned_as_responses() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|one", 3600, 1).await;
        Mock::given(method("POST"))
            .and(path("/sp/campaigns/list"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad filter"))
            .expect(1)
            .mount(&server)
            .await;
        let client = AdsClient::new(manager(&server, settings())).unwrap();

        let response = client
            .send(
                None,
                &AdsRequest::post("/sp/campaigns/list", json!({ "stateFilter": "bogus" })),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 422);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_absolute_urls_are_refused() {
        let server = MockServer::start().await;
        let client = AdsClient::new(manager(&server, settings())).unwrap();

        let err = client
            .send(None, &AdsRequest::get("https://evil.example/collect"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[tokio::test]
    async fn test_auto_detect_with_no_accepted_identity() {
        let server = MockServer::start().await;
        mount_token(&server, "Atza|one", 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/profiles"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;
        let mut settings = settings();
        settings.profile_id = Some("configured".to_string());
        let client = AdsClient::new(manager(&server, settings)).unwrap();

        let err = client.auto_detect_identity(None).await.unwrap_err();
        assert!(matches!(err, AuthError::NoActiveIdentity));

        // the configured profile is not sent with the identity check
        let received = server.received_requests().await.unwrap();
        let check = received
            .iter()
            .find(|r| r.url.path() == "/v2/profiles")
            .unwrap();
        assert!(check.headers.get(SCOPE_HEADER).is_none());
    }
}

