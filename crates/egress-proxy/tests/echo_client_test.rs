//! Integration tests for the IP-echo client using wiremock

use egress_proxy::http::USER_AGENT;
use egress_proxy::{EchoClient, EchoEndpoint, EgressIpSource, ProxyError};
use std::net::IpAddr;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(endpoints: Vec<EchoEndpoint>) -> EchoClient {
    EchoClient::direct(endpoints, Duration::from_secs(2)).expect("Failed to build echo client")
}

#[tokio::test]
async fn test_json_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ip"))
        .and(header("user-agent", USER_AGENT))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"origin": "203.0.113.44"}"#),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(vec![EchoEndpoint::json(
        format!("{}/ip", mock_server.uri()),
        "origin",
    )]);

    let ip = client.fetch_ip(Some("acct-1")).await.unwrap();
    assert_eq!(ip, "203.0.113.44".parse::<IpAddr>().unwrap());
}

#[tokio::test]
async fn test_forwarding_chain_uses_first_address() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"origin": "198.51.100.7, 203.0.113.1"}"#),
        )
        .mount(&mock_server)
        .await;

    let client = client(vec![EchoEndpoint::json(
        format!("{}/ip", mock_server.uri()),
        "origin",
    )]);

    let ip = client.fetch_ip(None).await.unwrap();
    assert_eq!(ip, "198.51.100.7".parse::<IpAddr>().unwrap());
}

#[tokio::test]
async fn test_falls_back_to_next_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status": "fail"}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("192.0.2.99\n"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(vec![
        EchoEndpoint::json(format!("{}/ip", mock_server.uri()), "origin"),
        EchoEndpoint::json(format!("{}/json/", mock_server.uri()), "query"),
        EchoEndpoint::plain_text(format!("{}/raw", mock_server.uri())),
    ]);

    let ip = client.fetch_ip(None).await.unwrap();
    assert_eq!(ip, "192.0.2.99".parse::<IpAddr>().unwrap());
}

#[tokio::test]
async fn test_loopback_answer_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("127.0.0.1"))
        .mount(&mock_server)
        .await;

    let client = client(vec![EchoEndpoint::plain_text(format!(
        "{}/raw",
        mock_server.uri()
    ))]);

    let err = client.fetch_ip(None).await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidIp(_)));
    assert!(err.is_egress_error());
}

#[tokio::test]
async fn test_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("203.0.113.5")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let client = EchoClient::direct(
        vec![EchoEndpoint::plain_text(format!("{}/raw", mock_server.uri()))],
        Duration::from_millis(200),
    )
    .unwrap();

    let err = client.fetch_ip(None).await.unwrap_err();
    assert!(matches!(err, ProxyError::EgressTimeout(_)));
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Bind and release a port so nothing is listening on it.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let client = client(vec![EchoEndpoint::plain_text(format!("http://{}/", addr))]);

    let err = client.fetch_ip(None).await.unwrap_err();
    assert!(matches!(err, ProxyError::EgressLookup(_)));
}
