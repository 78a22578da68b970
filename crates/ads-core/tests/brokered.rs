//! Brokered pathway: identity listing, selection and auto-detection through a
//! mock Openbridge plus a mock Ads API host.

use std::sync::Arc;

use ads_core::{
    provider, AdsClient, AdsRequest, AuthError, AuthManager, AuthStage, IdentityKind,
    OpenbridgeSettings, ProviderSettings, Region, RegionInfo, RegionRouter, Settings,
    CLIENT_ID_HEADER, SCOPE_HEADER,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager(server: &MockServer, remote_identity_id: Option<&str>) -> Arc<AuthManager> {
    let mut openbridge = OpenbridgeSettings::new("ob-refresh-token").with_base_url(&server.uri());
    openbridge.remote_identity_id = remote_identity_id.map(str::to_string);
    let settings = Settings::new(ProviderSettings::Openbridge(openbridge));

    // both regions point at the mock so overrides stay local
    let router = RegionRouter::with_endpoints(
        Region::Na,
        vec![
            RegionInfo::new(
                Region::Na,
                "North America",
                &server.uri(),
                &format!("{}/auth/o2/token", server.uri()),
            ),
            RegionInfo::new(
                Region::Eu,
                "Europe",
                &server.uri(),
                &format!("{}/auth/o2/token", server.uri()),
            ),
        ],
    );
    let provider = provider::from_settings(&settings, router.clone()).unwrap();
    Arc::new(AuthManager::new(provider, router, settings).unwrap())
}

async fn mount_broker(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/api/ref"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "attributes": { "token": "broker-jwt" } }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ri"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "111",
                    "attributes": { "name": "Revoked Seller" },
                    "relationships": { "remote_identity_type": { "data": { "id": "17" } } }
                },
                {
                    "id": "222",
                    "attributes": { "name": "Working Seller", "region": "na" },
                    "relationships": { "remote_identity_type": { "data": { "id": "17" } } }
                },
                {
                    "id": "333",
                    "attributes": { "name": "Some Shopify Store" },
                    "relationships": { "remote_identity_type": { "data": { "id": "1" } } }
                }
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/service/amzadv/token/111"))
        .respond_with(ResponseTemplate::new(403).set_body_string("identity revoked"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/service/amzadv/token/222"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "attributes": {
                    "access_token": "Atza|seller-222",
                    "client_id": "amzn1.application-oa2-client.abc",
                    "expires_in": 3600
                }
            }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_lists_amazon_ads_identities_only() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    let manager = manager(&server, None);

    let identities = manager.list_identities(None).await.unwrap();
    let ids: Vec<&str> = identities.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["111", "222"]);
    assert!(identities.iter().all(|i| i.kind == IdentityKind::Brokered));

    // two candidates and no configured default
    assert!(matches!(
        manager.get_active_identity(None).await,
        Err(AuthError::NoActiveIdentity)
    ));
}

#[tokio::test]
async fn test_configured_remote_identity_is_default() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    let manager = manager(&server, Some("222"));

    let creds = manager.get_active_credentials(None).await.unwrap();
    assert_eq!(creds.identity_id, "222");
    assert_eq!(creds.headers[CLIENT_ID_HEADER], "amzn1.application-oa2-client.abc");
}

#[tokio::test]
async fn test_selecting_unlisted_identity_fails() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    let manager = manager(&server, None);

    manager.list_identities(None).await.unwrap();
    let err = manager.set_active_identity(None, "333").await.unwrap_err();
    assert!(matches!(err, AuthError::IdentityNotFound(id) if id == "333"));
}

#[tokio::test]
async fn test_auto_detect_picks_first_working_identity() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/profiles"))
        .and(header("authorization", "Bearer Atza|seller-222"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let manager = manager(&server, None);
    let client = AdsClient::new(manager.clone()).unwrap();

    let detected = client.auto_detect_identity(Some("s1")).await.unwrap();
    assert_eq!(detected.id, "222");
    assert_eq!(
        manager.get_active_identity(Some("s1")).await.unwrap().id,
        "222"
    );

    // the detection only applies to the session that ran it
    assert!(manager.get_active_identity(Some("s2")).await.is_err());
}

#[tokio::test]
async fn test_requests_use_selected_identity() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/portfolios"))
        .and(header(CLIENT_ID_HEADER, "amzn1.application-oa2-client.abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let manager = manager(&server, None);
    let client = AdsClient::new(manager.clone()).unwrap();

    manager.list_identities(None).await.unwrap();
    manager.set_active_identity(None, "222").await.unwrap();
    let response = client
        .send(None, &AdsRequest::get("/v2/portfolios"))
        .await
        .unwrap();
    assert_eq!(response.identity_id, "222");
}

#[tokio::test]
async fn test_auto_detect_reports_last_failure() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/profiles"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;
    let manager = manager(&server, None);
    let client = AdsClient::new(manager.clone()).unwrap();

    // 111 cannot mint, 222 mints but is refused by the API
    let err = client.auto_detect_identity(Some("s1")).await.unwrap_err();
    match err {
        AuthError::Rejected {
            identity, stage, ..
        } => {
            assert_eq!(identity, "111");
            assert_eq!(stage, AuthStage::BrokerToken);
        }
        other => panic!("expected the mint rejection, got {:?}", other),
    }
    assert!(matches!(
        manager.get_active_identity(Some("s1")).await,
        Err(AuthError::NoActiveIdentity)
    ));
}

#[tokio::test]
async fn test_identity_check_ignores_session_profile() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/portfolios"))
        .and(header(SCOPE_HEADER, "999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let manager = manager(&server, None);
    let client = AdsClient::new(manager.clone()).unwrap();

    manager.set_active_profile(Some("s1"), "999").await;
    let detected = client.auto_detect_identity(Some("s1")).await.unwrap();
    assert_eq!(detected.id, "222");

    let received = server.received_requests().await.unwrap();
    let check = received
        .iter()
        .find(|r| r.url.path() == "/v2/profiles")
        .unwrap();
    assert!(check.headers.get(SCOPE_HEADER).is_none());

    // ordinary requests still carry the session profile
    client
        .send(Some("s1"), &AdsRequest::get("/v2/portfolios"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_404_outside_home_region_carries_hint() {
    let server = MockServer::start().await;
    mount_broker(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/stores"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(2)
        .mount(&server)
        .await;
    let manager = manager(&server, Some("222"));
    let client = AdsClient::new(manager.clone()).unwrap();

    let response = client
        .send(None, &AdsRequest::get("/v2/stores"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.region_hint, None);

    manager.set_region_override(None, Region::Eu).await;
    let response = client
        .send(None, &AdsRequest::get("/v2/stores"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.region, Region::Eu);
    assert_eq!(response.region_hint, Some(Region::Na));
}

