//! Tests for the instance module.
//!
//! Covers config decoding, live echo behavior over HTTP and HTTPS, and the
//! registry lifecycle (create, stop, reset, bind retry).

use super::*;
use crate::echo::{EchoPayload, Scheme};
use crate::tls::{TlsCredentials, CERT_FILE, KEY_FILE};
use serde_json::json;
use std::time::Duration;

fn local_config(paths: &str, response_code: u16) -> InstanceConfig {
    InstanceConfig {
        instance_number: 1,
        cluster_name: "c1".to_string(),
        matching_paths: crate::config::MatchingPaths::parse_delimited(paths),
        response_code,
        host: Some("127.0.0.1".to_string()),
        ..Default::default()
    }
}

fn test_registry() -> InstanceRegistry {
    InstanceRegistry::new(RegistrySettings {
        tls: TlsCredentials::in_dir("/nonexistent-tls-dir"),
        retry: RetryPolicy::fixed(Duration::from_millis(10)),
    })
}

fn write_self_signed(dir: &std::path::Path) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    std::fs::write(dir.join(CERT_FILE), cert.cert.pem()).unwrap();
    std::fs::write(dir.join(KEY_FILE), cert.key_pair.serialize_pem()).unwrap();
}

async fn port_accepts(port: u16) -> bool {
    tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .is_ok()
}

// ============================================================================
// Config decoding
// ============================================================================

#[test]
fn test_instance_config_defaults() {
    let config: InstanceConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.response_code, 200);
    assert_eq!(config.port, 0);
    assert!(!config.use_https);
    assert!(config.matching_paths.is_empty());
    assert_eq!(config.scheme(), Scheme::Http);
}

#[test]
fn test_instance_config_harness_shape() {
    let json = json!({
        "instanceNumber": 3,
        "clusterName": "cluster-a",
        "matchingPaths": "/foo/:id|/bar",
        "responseCode": 201,
        "runHTTPS": true,
        "responseHeaders": {"X-Test": "1"},
        "port": 8081
    });
    let config: InstanceConfig = serde_json::from_value(json).unwrap();
    assert_eq!(config.instance_number, 3);
    assert_eq!(config.cluster_name, "cluster-a");
    assert_eq!(config.matching_paths.as_slice(), ["/foo/:id", "/bar"]);
    assert_eq!(config.response_code, 201);
    assert!(config.use_https);
    assert_eq!(config.scheme(), Scheme::Https);
    assert_eq!(config.response_headers.unwrap().len(), 1);
    assert_eq!(config.port, 8081);
}

#[test]
fn test_instance_config_null_fields() {
    let json = json!({"matchingPaths": null, "clusterName": null, "useHTTPS": false});
    let config: InstanceConfig = serde_json::from_value(json).unwrap();
    assert!(config.matching_paths.is_empty());
    assert_eq!(config.cluster_name, "");
}

#[test]
fn test_instance_config_encoded_headers() {
    let json = json!({"responseHeaders": "{\"X-Encoded\":\"yes\"}"});
    let config: InstanceConfig = serde_json::from_value(json).unwrap();
    let headers = config.response_headers.unwrap();
    let (name, value) = headers.iter().next().unwrap();
    assert_eq!(name.as_str(), "x-encoded");
    assert_eq!(value, "yes");
}

#[test]
fn test_instance_config_rejects_nested_header_value() {
    let json = json!({"responseHeaders": {"X-Bad": {"nested": true}}});
    assert!(serde_json::from_value::<InstanceConfig>(json).is_err());
}

// ============================================================================
// Live instances
// ============================================================================

#[tokio::test]
async fn test_instance_start_and_stop() {
    let instance = UpstreamInstance::start(
        local_config("/foo", 200),
        &TlsCredentials::in_dir("/nonexistent"),
        RetryPolicy::default(),
    )
    .await
    .unwrap();

    let port = instance.port();
    assert_ne!(port, 0);
    assert_eq!(instance.state(), InstanceState::Listening);
    assert!(port_accepts(port).await);

    instance.stop().await.unwrap();
    assert_eq!(instance.state(), InstanceState::Closed);
    assert!(!port_accepts(port).await);
    assert!(matches!(
        instance.stop().await,
        Err(InstanceError::AlreadyClosed(p)) if p == port
    ));
}

#[tokio::test]
async fn test_matched_path_echoes_request() {
    let registry = test_registry();
    let port = registry.create(local_config("/foo/:id", 201)).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/foo/42?x=1"))
        .json(&json!({"a": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(
        response.headers()["content-type"],
        "application/json; charset=utf-8"
    );

    let payload: EchoPayload = response.json().await.unwrap();
    assert_eq!(payload.cluster, "c1");
    assert_eq!(payload.instance, 1);
    assert_eq!(payload.request.params["id"], "42");
    assert_eq!(payload.request.path, "/foo/42");
    assert_eq!(payload.request.query["x"], json!("1"));
    assert_eq!(payload.request.body, json!({"a": 1}));
    assert_eq!(payload.request.protocol, Scheme::Http);
    assert!(!payload.request.secure);
    assert_eq!(payload.request.base_url, "");
    assert!(payload.request.signed_cookies.is_empty());

    registry.reset_all().await;
}

#[tokio::test]
async fn test_unmatched_path_is_404_with_echo() {
    let registry = test_registry();
    let port = registry.create(local_config("/foo/:id", 201)).await.unwrap();

    let response = reqwest::get(format!("http://127.0.0.1:{port}/bar"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let payload: EchoPayload = response.json().await.unwrap();
    assert_eq!(payload.cluster, "c1");
    assert_eq!(payload.request.path, "/bar");
    assert!(payload.request.params.is_empty());
    assert_eq!(payload.request.body, json!({}));

    registry.reset_all().await;
}

#[tokio::test]
async fn test_response_headers_on_every_response() {
    let registry = test_registry();
    let mut config = local_config("/ok", 200);
    config.response_headers = Some(
        serde_json::from_value(json!({"X-Upstream": "fake", "Cache-Control": "no-store"}))
            .unwrap(),
    );
    let port = registry.create(config).await.unwrap();

    for (path, status) in [("/ok", 200), ("/missing", 404)] {
        let response = reqwest::get(format!("http://127.0.0.1:{port}{path}"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), status);
        assert_eq!(response.headers()["x-upstream"], "fake");
        assert_eq!(response.headers()["cache-control"], "no-store");
    }

    registry.reset_all().await;
}

#[tokio::test]
async fn test_configured_content_type_wins() {
    let registry = test_registry();
    let mut config = local_config("/ok", 200);
    config.response_headers =
        Some(serde_json::from_value(json!({"Content-Type": "text/plain"})).unwrap());
    let port = registry.create(config).await.unwrap();

    let response = reqwest::get(format!("http://127.0.0.1:{port}/ok"))
        .await
        .unwrap();
    assert_eq!(response.headers()["content-type"], "text/plain");

    registry.reset_all().await;
}

#[tokio::test]
async fn test_url_to_application_round_trips() {
    let registry = test_registry();
    let port = registry.create(local_config("/a/*", 200)).await.unwrap();

    let requested = format!("http://127.0.0.1:{port}/a/b/c?q=1");
    let payload: EchoPayload = reqwest::get(&requested)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let echoed = reqwest::Url::parse(&payload.request.url_to_application).unwrap();
    let original = reqwest::Url::parse(&requested).unwrap();
    assert_eq!(echoed, original);
    assert_eq!(payload.request.params["0"], "b/c");
    assert_eq!(
        payload.request.url_to_rp.as_deref(),
        Some(format!("127.0.0.1:{port}").as_str())
    );
    assert_eq!(payload.request.hostname.as_deref(), Some("127.0.0.1"));

    registry.reset_all().await;
}

#[tokio::test]
async fn test_malformed_json_is_400_with_echo() {
    let registry = test_registry();
    let port = registry.create(local_config("/foo", 200)).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/foo"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let payload: EchoPayload = response.json().await.unwrap();
    assert_eq!(payload.cluster, "c1");
    assert_eq!(payload.request.body, serde_json::Value::Null);

    registry.reset_all().await;
}

#[tokio::test]
async fn test_oversized_body_is_413_with_echo() {
    let registry = test_registry();
    let port = registry.create(local_config("/upload", 201)).await.unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://127.0.0.1:{port}/upload"))
        .header("content-type", "application/json")
        .body(vec![b' '; 150 * 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);

    let payload: EchoPayload = response.json().await.unwrap();
    assert_eq!(payload.cluster, "c1");
    assert_eq!(payload.request.path, "/upload");
    assert_eq!(payload.request.body, serde_json::Value::Null);

    // A body right at the limit still goes through
    let at_limit = format!("\"{}\"", "x".repeat(100 * 1024 - 2));
    let response = client
        .post(format!("http://127.0.0.1:{port}/upload"))
        .header("content-type", "application/json")
        .body(at_limit)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    registry.reset_all().await;
}

#[tokio::test]
async fn test_health_check_path() {
    let registry = test_registry();
    let mut config = local_config("/*", 503);
    config.health_check_path = Some(crate::config::HEALTH_CHECK_PATH.to_string());
    let port = registry.create(config).await.unwrap();

    let response = reqwest::get(format!(
        "http://127.0.0.1:{port}{}",
        crate::config::HEALTH_CHECK_PATH
    ))
    .await
    .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.bytes().await.unwrap().is_empty());

    let response = reqwest::get(format!("http://127.0.0.1:{port}/anything"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 503);

    registry.reset_all().await;
}

#[tokio::test]
async fn test_https_instance() {
    let dir = tempfile::tempdir().unwrap();
    write_self_signed(dir.path());

    let registry = InstanceRegistry::new(RegistrySettings {
        tls: TlsCredentials::in_dir(dir.path()),
        retry: RetryPolicy::default(),
    });
    let mut config = local_config("/secure", 200);
    config.use_https = true;
    let port = registry.create(config).await.unwrap();

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let payload: EchoPayload = client
        .get(format!("https://127.0.0.1:{port}/secure"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(payload.request.protocol, Scheme::Https);
    assert!(payload.request.secure);
    assert!(payload.request.url_to_application.starts_with("https://"));

    let summary = registry.stop_by_port(port).await.unwrap();
    assert_eq!(summary.protocol, Scheme::Https);
}

#[tokio::test]
async fn test_https_without_credentials_fails_before_bind() {
    let registry = test_registry();
    let mut config = local_config("/secure", 200);
    config.use_https = true;

    let err = registry.create(config).await.unwrap_err();
    assert!(matches!(err, InstanceError::Tls(_)));
    assert_eq!(registry.count(), 0);
}

#[tokio::test]
async fn test_invalid_pattern_rejected() {
    let registry = test_registry();
    let err = registry
        .create(local_config("/foo/(unclosed", 200))
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceError::Config(_)));
    assert_eq!(registry.count(), 0);
}

#[tokio::test]
async fn test_star_pattern_matches_every_path() {
    let registry = test_registry();
    let mut config: InstanceConfig = serde_json::from_value(json!({
        "instanceNumber": 4,
        "clusterName": "default",
        "matchingPaths": "*",
        "responseCode": 200,
        "runHTTPS": false,
        "responseHeaders": {}
    }))
    .unwrap();
    config.host = Some("127.0.0.1".to_string());
    let port = registry.create(config).await.unwrap();

    for path in ["/", "/anything", "/deep/nested/path"] {
        let response = reqwest::get(format!("http://127.0.0.1:{port}{path}"))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let payload: EchoPayload = response.json().await.unwrap();
        assert_eq!(payload.request.params["0"], path);
    }

    registry.reset_all().await;
}

#[tokio::test]
async fn test_path_matching_ignores_case() {
    let registry = test_registry();
    let port = registry.create(local_config("/foo/:id", 201)).await.unwrap();

    let response = reqwest::get(format!("http://127.0.0.1:{port}/FOO/AbC"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let payload: EchoPayload = response.json().await.unwrap();
    assert_eq!(payload.request.params["id"], "AbC");
    assert_eq!(payload.request.path, "/FOO/AbC");

    registry.reset_all().await;
}

#[tokio::test]
async fn test_invalid_status_rejected() {
    let registry = test_registry();
    let err = registry.create(local_config("/foo", 42)).await.unwrap_err();
    assert!(matches!(err, InstanceError::Config(_)));
}

// ============================================================================
// Registry lifecycle
// ============================================================================

#[tokio::test]
async fn test_reset_releases_all_ports() {
    let registry = test_registry();
    let a = registry.create(local_config("/a", 200)).await.unwrap();
    let b = registry.create(local_config("/b", 200)).await.unwrap();
    assert_eq!(registry.count(), 2);

    assert_eq!(registry.reset_all().await, 2);
    assert_eq!(registry.count(), 0);
    assert!(!port_accepts(a).await);
    assert!(!port_accepts(b).await);

    // A second reset is a no-op
    assert_eq!(registry.reset_all().await, 0);
}

#[tokio::test]
async fn test_parallel_creates_get_distinct_ports() {
    let registry = std::sync::Arc::new(test_registry());
    let creates = (0..8).map(|i| {
        let registry = std::sync::Arc::clone(&registry);
        async move {
            let mut config = local_config("/p", 200);
            config.instance_number = i;
            registry.create(config).await.unwrap()
        }
    });

    let mut ports = futures::future::join_all(creates).await;
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 8);
    assert_eq!(registry.count(), 8);

    let listed: Vec<u16> = registry.list().iter().map(|s| s.port).collect();
    assert_eq!(listed, ports);

    registry.reset_all().await;
}

#[tokio::test]
async fn test_stop_by_port() {
    let registry = test_registry();
    let port = registry.create(local_config("/x", 202)).await.unwrap();
    assert!(registry.contains(port));

    let summary = registry.stop_by_port(port).await.unwrap();
    assert_eq!(summary.port, port);
    assert_eq!(summary.cluster_name, "c1");
    assert_eq!(summary.response_code, 202);
    assert!(!registry.contains(port));
    assert!(!port_accepts(port).await);

    assert!(matches!(
        registry.stop_by_port(port).await,
        Err(InstanceError::NotFound(p)) if p == port
    ));
}

#[tokio::test]
async fn test_stop_unknown_port() {
    let registry = test_registry();
    assert!(matches!(
        registry.stop_by_port(1).await,
        Err(InstanceError::NotFound(1))
    ));
}

#[tokio::test]
async fn test_create_retries_until_port_free() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(blocker);
    });

    let registry = test_registry();
    let mut config = local_config("/r", 200);
    config.port = port;
    let bound = registry.create(config).await.unwrap();
    release.await.unwrap();

    assert_eq!(bound, port);
    let response = reqwest::get(format!("http://127.0.0.1:{port}/r"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    registry.reset_all().await;
}

#[tokio::test]
async fn test_recreate_on_same_port_after_stop() {
    let registry = test_registry();
    let port = registry.create(local_config("/v1", 200)).await.unwrap();
    registry.stop_by_port(port).await.unwrap();

    let mut config = local_config("/v2", 200);
    config.port = port;
    config.instance_number = 2;
    assert_eq!(registry.create(config).await.unwrap(), port);

    let payload: EchoPayload = reqwest::get(format!("http://127.0.0.1:{port}/v2"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(payload.instance, 2);

    registry.reset_all().await;
}

#[tokio::test]
async fn test_unresolvable_bind_is_fatal() {
    let registry = test_registry();
    let mut config = local_config("/x", 200);
    config.host = Some("192.0.2.1".to_string());

    let err = registry.create(config).await.unwrap_err();
    assert!(matches!(err, InstanceError::BindError(..)));
    assert_eq!(registry.count(), 0);
}
