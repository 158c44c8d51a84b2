//! HttpProber against local wiremock servers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sitepulse::probes::{HttpProber, Prober, Reachability};
use sitepulse::scheduler::ManualClock;
use sitepulse::sites::Site;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn prober(timeout: Duration) -> HttpProber {
    HttpProber::new(timeout, "sitepulse-test").unwrap()
}

fn site(url: String) -> Site {
    Site::parse(&url).unwrap()
}

#[tokio::test]
async fn test_ok_response_is_up() {
    let server = MockServer::start().await;
    Mock::given(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let target = site(format!("{}/health", server.uri()));
    let outcome = prober(Duration::from_secs(5)).check(&target).await;

    assert_eq!(outcome.reachable, Reachability::Up);
    assert_eq!(outcome.status_code, Some(200));
    assert_eq!(outcome.site, target.as_str());
    assert_eq!(outcome.observed_at.timestamp_subsec_nanos(), 0);
}

#[tokio::test]
async fn test_server_error_is_down() {
    let server = MockServer::start().await;
    Mock::given(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let outcome = prober(Duration::from_secs(5))
        .check(&site(format!("{}/", server.uri())))
        .await;

    assert_eq!(outcome.reachable, Reachability::Down);
    assert_eq!(outcome.status_code, Some(500));
}

#[tokio::test]
async fn test_not_found_is_down() {
    let server = MockServer::start().await;

    // wiremock answers 404 for unmatched requests
    let outcome = prober(Duration::from_secs(5))
        .check(&site(format!("{}/missing", server.uri())))
        .await;

    assert_eq!(outcome.reachable, Reachability::Down);
    assert_eq!(outcome.status_code, Some(404));
}

#[tokio::test]
async fn test_redirect_is_followed() {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(path("/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = prober(Duration::from_secs(5))
        .check(&site(format!("{}/old", server.uri())))
        .await;

    assert_eq!(outcome.reachable, Reachability::Up);
    assert_eq!(outcome.status_code, Some(200));
}

#[tokio::test]
async fn test_uses_head_request() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::method("HEAD"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = prober(Duration::from_secs(5))
        .check(&site(server.uri()))
        .await;

    assert_eq!(outcome.status_code, Some(204));
}

#[tokio::test]
async fn test_timeout_is_error() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let timeout = Duration::from_millis(300);
    let outcome = prober(timeout)
        .check(&site(format!("{}/slow", server.uri())))
        .await;

    assert_eq!(outcome.reachable, Reachability::Error);
    assert_eq!(outcome.status_code, None);
    assert!(outcome.latency >= timeout, "latency {:?}", outcome.latency);
    assert!(outcome.latency < Duration::from_secs(3), "latency {:?}", outcome.latency);
}

#[tokio::test]
async fn test_connection_refused_is_error() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let outcome = prober(Duration::from_secs(5))
        .check(&site(format!("http://127.0.0.1:{}/", port)))
        .await;

    assert_eq!(outcome.reachable, Reachability::Error);
    assert_eq!(outcome.status_code, None);
}

#[tokio::test]
async fn test_observed_at_comes_from_injected_clock() {
    let server = MockServer::start().await;
    Mock::given(path("/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start + chrono::Duration::milliseconds(750)));
    let outcome = prober(Duration::from_secs(5))
        .with_clock(clock)
        .check(&site(format!("{}/", server.uri())))
        .await;

    assert_eq!(outcome.reachable, Reachability::Up);
    assert_eq!(outcome.observed_at, start);
}
