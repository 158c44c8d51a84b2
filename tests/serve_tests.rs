//! Daemon startup failures.

use std::time::Duration;

use sitepulse::config::MonitorConfig;
use tokio_util::sync::CancellationToken;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_bad_bind_address_starts_nothing() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sites = dir.path().join("sites.conf");
    std::fs::write(&sites, format!("{}/\n", server.uri())).unwrap();

    let mut config = MonitorConfig::default();
    config.storage.db_path = dir.path().join("sitepulse.db");
    config.sites.path = sites;
    config.api.bind = "not-an-address".to_string();

    let shutdown = CancellationToken::new();
    let err = sitepulse::serve(config, shutdown.clone()).await.unwrap_err();
    assert!(err.to_string().contains("invalid bind address"));

    // a scheduler left running would sweep immediately
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_port_in_use_starts_nothing() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let sites = dir.path().join("sites.conf");
    std::fs::write(&sites, format!("{}/\n", server.uri())).unwrap();

    let mut config = MonitorConfig::default();
    config.storage.db_path = dir.path().join("sitepulse.db");
    config.sites.path = sites;
    config.api.bind = taken.local_addr().unwrap().to_string();

    let err = sitepulse::serve(config, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot bind"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.received_requests().await.unwrap().is_empty());
}
