//! Dell power source against a mocked OpenManage Enterprise

use std::sync::Arc;

use fleet_poller::adapters::openmanage::OpenManageClient;
use fleet_poller::orchestrator::QueryOptions;
use fleet_poller::source::dell::{DellPowerSource, POWER};
use fleet_poller::source::{ScrapePolicy, Source};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::names;

async fn mock_ome() -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/SessionService/Sessions"))
        .respond_with(ResponseTemplate::new(201).insert_header("X-Auth-Token", "token-1"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/DeviceService/Devices"))
        .and(header("X-Auth-Token", "token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"Id": 1, "DeviceName": "node1mp.dc.example"},
                {"Id": 2, "DeviceName": "node2mp.dc.example"}
            ]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/DeviceService/Devices(1)/Power"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"power": 301})))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/DeviceService/Devices(2)/Power"))
        .respond_with(ResponseTemplate::new(500).set_body_string("iDRAC unreachable"))
        .mount(&mock_server)
        .await;

    mock_server
}

#[tokio::test]
async fn test_manual_policy_uses_configured_names() {
    let mock_server = mock_ome().await;
    let client = OpenManageClient::connect(mock_server.uri(), "admin", "secret", true)
        .await
        .unwrap();

    let mut source = DellPowerSource::new(
        "ome",
        ScrapePolicy::Manual(names(&[
            "node1.dc.example",
            "node2.dc.example",
            "node3.dc.example",
        ])),
        QueryOptions::default(),
        Arc::new(client),
    )
    .await;

    let data = source.probe().await.unwrap();

    let power: Vec<_> = data
        .named(POWER)
        .map(|v| (v.label_values[0].as_str(), v.value))
        .collect();
    assert_eq!(power, vec![("node1.dc.example", 301.0)]);
    assert_eq!(data.named("request_ts").count(), 1);
}

#[tokio::test]
async fn test_all_policy_uses_device_names() {
    let mock_server = mock_ome().await;
    let client = OpenManageClient::connect(mock_server.uri(), "admin", "secret", true)
        .await
        .unwrap();

    let mut source = DellPowerSource::new(
        "ome",
        ScrapePolicy::All,
        QueryOptions::default(),
        Arc::new(client),
    )
    .await;

    let data = source.probe().await.unwrap();

    let power: Vec<_> = data
        .named(POWER)
        .map(|v| (v.label_values[0].as_str(), v.value))
        .collect();
    assert_eq!(power, vec![("node1mp.dc.example", 301.0)]);
}

#[tokio::test]
async fn test_expired_session_is_renewed_on_next_cycle() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/SessionService/Sessions"))
        .respond_with(ResponseTemplate::new(201).insert_header("X-Auth-Token", "token-1"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/DeviceService/Devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"Id": 1, "DeviceName": "node1mp.dc.example"}]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/DeviceService/Devices(1)/Power"))
        .respond_with(ResponseTemplate::new(401).set_body_string("session expired"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/DeviceService/Devices(1)/Power"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"power": 250})))
        .mount(&mock_server)
        .await;

    let client = OpenManageClient::connect(mock_server.uri(), "admin", "secret", true)
        .await
        .unwrap();
    let mut source = DellPowerSource::new(
        "ome",
        ScrapePolicy::Manual(names(&["node1.dc.example"])),
        QueryOptions::default(),
        Arc::new(client),
    )
    .await;

    let first = source.probe().await.unwrap();
    assert!(first.is_empty());

    let second = source.probe().await.unwrap();
    let power: Vec<_> = second.named(POWER).map(|v| v.value).collect();
    assert_eq!(power, vec![250.0]);

    let session_posts = mock_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.method.as_str() == "POST")
        .count();
    assert_eq!(session_posts, 2);
}
