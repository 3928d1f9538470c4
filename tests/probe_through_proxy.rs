//! Probing through a real HTTP proxy
//!
//! The mock server plays the forward proxy: plain-HTTP requests arrive with
//! an absolute URI, so endpoints on an unresolvable host still reach it.

use proxy_sentinel::proxy::{
    BatchRunner, CheckerConfig, NullSink, ProbeKind, ProxyChecker, ProxyRecord,
};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ECHO_HOST: &str = "http://ipecho.test";

fn endpoint(route: &str) -> String {
    format!("{}{}", ECHO_HOST, route)
}

fn proxy_for(server: &MockServer) -> ProxyRecord {
    let port = server.address().port();
    ProxyRecord::new(&format!("127.0.0.1:{}", port))
}

fn checker(urls: &[&str]) -> ProxyChecker {
    let config = CheckerConfig::new()
        .with_strict(false)
        .with_timeout(Duration::from_secs(5))
        .with_pacing_delay(Duration::ZERO)
        .with_test_urls(urls.iter().map(|u| endpoint(u)).collect());
    ProxyChecker::with_config(config)
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_ip_matched_through_proxy() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/ip",
        ResponseTemplate::new(200).set_body_json(json!({ "origin": "127.0.0.1" })),
    )
    .await;

    let outcome = checker(&["/ip"]).probe(&proxy_for(&server), &endpoint("/ip")).await;
    assert_eq!(outcome.kind, ProbeKind::IpMatched);
    assert_eq!(outcome.observed_identity, vec!["127.0.0.1"]);
}

#[tokio::test]
async fn test_ip_mismatch_through_proxy() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/ip",
        ResponseTemplate::new(200).set_body_json(json!({ "origin": "9.9.9.9" })),
    )
    .await;

    let outcome = checker(&["/ip"]).probe(&proxy_for(&server), &endpoint("/ip")).await;
    assert_eq!(outcome.kind, ProbeKind::IpMismatch);
    assert!(outcome.describe().contains("expected: 127.0.0.1, actual: 9.9.9.9"));
}

#[tokio::test]
async fn test_bad_status_and_non_json() {
    let server = MockServer::start().await;
    mount(&server, "/ip", ResponseTemplate::new(502)).await;
    mount(
        &server,
        "/text",
        ResponseTemplate::new(200).set_body_raw("127.0.0.1", "text/plain"),
    )
    .await;

    let checker = checker(&["/ip", "/text"]);
    let proxy = proxy_for(&server);

    let outcome = checker.probe(&proxy, &endpoint("/ip")).await;
    assert_eq!(outcome.kind, ProbeKind::BadStatus);
    assert_eq!(outcome.status_code, Some(502));

    let outcome = checker.probe(&proxy, &endpoint("/text")).await;
    assert_eq!(outcome.kind, ProbeKind::NonJsonSuccess);
    assert!(outcome.succeeded());
}

#[tokio::test]
async fn test_slow_proxy_times_out() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/ip",
        ResponseTemplate::new(200)
            .set_body_json(json!({ "origin": "127.0.0.1" }))
            .set_delay(Duration::from_secs(3)),
    )
    .await;

    let config = CheckerConfig::new()
        .with_timeout(Duration::from_millis(300))
        .with_test_urls(vec![endpoint("/ip")]);
    let outcome = ProxyChecker::with_config(config)
        .probe(&proxy_for(&server), &endpoint("/ip"))
        .await;
    assert_eq!(outcome.kind, ProbeKind::Timeout);
    assert!(outcome.elapsed_seconds < 3.0);
}

fn dead_proxy() -> ProxyRecord {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ProxyRecord::new(&format!("127.0.0.1:{}", port))
}

#[tokio::test]
async fn test_unreachable_proxy_is_proxy_error() {
    let outcome = checker(&["/ip"]).probe(&dead_proxy(), &endpoint("/ip")).await;
    assert_eq!(outcome.kind, ProbeKind::ProxyError);
    assert!(!outcome.succeeded());
    assert!(outcome.excerpt.to_lowercase().contains("refused"));
}

#[tokio::test]
async fn test_endpoint_names_do_not_change_the_kind() {
    let urls = [
        "http://proxycheck.test/ip",
        "http://proxycheck.test/v1/403",
        "http://echo.test/tunnel/407",
    ];
    let config = CheckerConfig::new()
        .with_strict(false)
        .with_timeout(Duration::from_secs(5))
        .with_pacing_delay(Duration::ZERO)
        .with_test_urls(urls.iter().map(|u| u.to_string()).collect());
    let verdict = ProxyChecker::with_config(config)
        .check_proxy(&dead_proxy())
        .await;

    assert!(!verdict.is_valid);
    assert_eq!(verdict.attempted, 3);
    assert_eq!(verdict.message.matches("proxy error (").count(), 3);
    assert!(!verdict.message.contains("authentication"));
    assert!(!verdict.message.contains("forbidden"));
}

#[tokio::test]
async fn test_slow_proxy_behind_proxy_named_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proxy/ip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "origin": "127.0.0.1" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let url = "http://proxycheck.test/proxy/ip".to_string();
    let config = CheckerConfig::new()
        .with_timeout(Duration::from_millis(300))
        .with_test_urls(vec![url.clone()]);
    let outcome = ProxyChecker::with_config(config)
        .probe(&proxy_for(&server), &url)
        .await;
    assert_eq!(outcome.kind, ProbeKind::Timeout);
}

#[tokio::test]
async fn test_strict_verdict_over_three_endpoints() {
    // The forward proxy matches on path alone, so the built-in endpoints land
    // here: httpbin `/ip`, ipify `/` and ip-api `/json`
    let server = MockServer::start().await;
    mount(
        &server,
        "/ip",
        ResponseTemplate::new(200).set_body_json(json!({ "origin": "127.0.0.1" })),
    )
    .await;
    mount(
        &server,
        "/",
        ResponseTemplate::new(200).set_body_json(json!({ "ip": "127.0.0.1" })),
    )
    .await;
    mount(
        &server,
        "/json",
        ResponseTemplate::new(200).set_body_json(json!({ "status": "fail" })),
    )
    .await;

    let config = CheckerConfig::new()
        .with_timeout(Duration::from_secs(5))
        .with_test_urls(vec![endpoint("/ignored")]);
    let verdict = ProxyChecker::with_config(config)
        .check_proxy(&proxy_for(&server))
        .await;

    // 2 of 3 is below the 80% threshold
    assert!(!verdict.is_valid);
    assert_eq!(verdict.succeeded, 2);
    assert_eq!(verdict.attempted, 3);
    assert!(verdict.message.starts_with("invalid (success rate: 66.7%"));
    assert!(verdict.message.contains("no ip field"));
    assert!(!verdict.message.contains("/ignored"));
}

#[tokio::test]
async fn test_batch_over_live_and_dead_proxies() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/ip",
        ResponseTemplate::new(200).set_body_json(json!({ "origin": "127.0.0.1" })),
    )
    .await;

    let proxies = vec![
        format!("127.0.0.1:{}", server.address().port()),
        dead_proxy().raw,
    ];
    let report = BatchRunner::new(checker(&["/ip"]))
        .run(&proxies, &mut NullSink, &CancellationToken::new())
        .await;

    assert!(report.is_complete());
    assert_eq!(report.valid_count(), 1);
    assert!(report.verdicts[0].is_valid);
    assert!(!report.verdicts[1].is_valid);
    let message = report.verdicts[1].message.to_lowercase();
    assert!(message.contains("proxy error"), "message: {}", message);
    assert!(message.contains("refused"), "message: {}", message);
}
