//! Failure injection tests: slow, unreachable and misbehaving targets.

use serde_json::{json, Value};
use std::time::Duration;

mod common;

use common::{closed_port, start_target, test_config, ProxyHarness};

#[tokio::test]
async fn test_timeout_leaves_session_untouched() {
    let target = start_target().await;
    let proxy = ProxyHarness::start().await;
    let session = proxy.subscribe().await;

    proxy
        .post_json("/set-headers", &session, Some(json!({"X-Test": "1"})))
        .await;
    proxy
        .forward(&session, json!({"url": format!("http://{target}/set-cookie")}))
        .await;

    let (status, body) = proxy
        .forward(&session, json!({"url": format!("http://{target}/slow"), "timeout": 1}))
        .await;
    assert_eq!(status, 408);
    assert_eq!(body["error_type"], "TimeoutError");
    assert_eq!(body["timeout"], 1);
    assert_eq!(body["method"], "GET");
    assert_eq!(body["url"], format!("http://{target}/slow"));

    let (_, body) = proxy.post_json("/get-cookies", &session, None).await;
    assert_eq!(body["cookies"][0]["value"], "abc");
    let (_, body) = proxy.post_json("/get-headers", &session, None).await;
    assert_eq!(body["headers"], json!({"X-Test": "1"}));

    // the session keeps working after a timeout
    let (status, _) = proxy
        .forward(&session, json!({"url": format!("http://{target}/echo")}))
        .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_unreachable_target_is_bad_gateway() {
    let proxy = ProxyHarness::start().await;
    let session = proxy.subscribe().await;
    let url = format!("http://127.0.0.1:{}/", closed_port());

    let (status, body) = proxy
        .forward(&session, json!({"url": url, "method": "DELETE"}))
        .await;
    assert_eq!(status, 502);
    assert_eq!(body["error_type"], "ConnectionError");
    assert_eq!(body["url"], url.as_str());
    assert_eq!(body["method"], "DELETE");
    assert!(proxy.store.is_valid(&session));
}

#[tokio::test]
async fn test_invalid_payloads_are_rejected() {
    let proxy = ProxyHarness::start().await;
    let session = proxy.subscribe().await;

    for payload in [
        json!({"url": "http://127.0.0.1/", "method": "TRACE"}),
        json!({"url": "ftp://x"}),
        json!({"url": "http://127.0.0.1/", "timeout": 0}),
        json!({"url": "http://127.0.0.1/", "timeout": 301}),
        json!({"url": "http://127.0.0.1/", "headers": {"X-Bad": 1}}),
        json!({"url": "http://127.0.0.1/", "cookies": {"sid": {"value": "abc"}}}),
        json!({"method": "GET"}),
    ] {
        let (status, body) = proxy.forward(&session, payload.clone()).await;
        assert_eq!(status, 400, "payload {payload} should be rejected");
        assert_eq!(body["error_type"], "ValidationError");
    }

    // malformed JSON is still answered with a JSON error
    let res = proxy
        .client
        .post(proxy.url("/forward"))
        .header("X-Session-Id", &session)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error_type"], "ValidationError");

    // nothing from the rejected calls reached the session
    let (_, body) = proxy.post_json("/get-cookies", &session, None).await;
    assert_eq!(body["cookies"], json!([]));
}

#[tokio::test]
async fn test_set_headers_validation() {
    let proxy = ProxyHarness::start().await;
    let session = proxy.subscribe().await;
    proxy
        .post_json("/set-headers", &session, Some(json!({"X-Keep": "1"})))
        .await;

    for payload in [json!({"X-Num": 5}), json!(["X-Test"]), json!({"bad header": "1"})] {
        let (status, body) = proxy.post_json("/set-headers", &session, Some(payload)).await;
        assert_eq!(status, 400);
        assert_eq!(body["error_type"], "ValidationError");
    }

    let (_, body) = proxy.post_json("/get-headers", &session, None).await;
    assert_eq!(body["headers"], json!({"X-Keep": "1"}));
}

#[tokio::test]
async fn test_redirect_loop_hits_hop_limit() {
    let target = start_target().await;
    let mut config = test_config();
    config.forward.max_redirects = 5;
    let proxy = ProxyHarness::start_with(config).await;
    let session = proxy.subscribe().await;

    let (status, body) = proxy
        .forward(&session, json!({"url": format!("http://{target}/loop")}))
        .await;
    assert_eq!(status, 500);
    assert_eq!(body["error_type"], "TooManyRedirects");
}

#[tokio::test]
async fn test_download_streams_attachment() {
    let target = start_target().await;
    let proxy = ProxyHarness::start().await;
    let session = proxy.subscribe().await;

    let res = proxy
        .post("/download", &session, Some(json!({"url": format!("http://{target}/file")})))
        .await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "text/csv");
    assert_eq!(res.headers()["content-disposition"], "attachment; filename=\"report.csv\"");
    assert_eq!(res.text().await.unwrap(), "a,b\n1,2\n");

    // legacy alias, no disposition from the target
    let res = proxy
        .post("/dowwnload", &session, Some(json!({"url": format!("http://{target}/plain")})))
        .await;
    assert_eq!(res.status(), 200);
    assert_eq!(
        res.headers()["content-disposition"],
        "attachment; filename=\"downloaded_file\""
    );
    assert_eq!(res.text().await.unwrap(), "plain body");
}

#[tokio::test]
async fn test_download_failure_is_json() {
    let proxy = ProxyHarness::start().await;
    let session = proxy.subscribe().await;

    let res = proxy
        .post(
            "/download",
            &session,
            Some(json!({"url": format!("http://127.0.0.1:{}/f", closed_port())})),
        )
        .await;
    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error_type"], "ConnectionError");
}

#[tokio::test]
async fn test_stalled_download_body_is_cut_off() {
    let target = start_target().await;
    let proxy = ProxyHarness::start().await;
    let session = proxy.subscribe().await;

    let res = proxy
        .post(
            "/download",
            &session,
            Some(json!({"url": format!("http://{target}/stall"), "timeout": 1})),
        )
        .await;
    assert_eq!(res.status(), 200);

    // the target resumes after three seconds; the proxy gives up after one
    let body = tokio::time::timeout(Duration::from_millis(2500), res.bytes())
        .await
        .expect("body should end before the target resumes");
    assert!(body.is_err());

    assert!(proxy.store.is_valid(&session));
}

#[tokio::test]
async fn test_idle_session_expires() {
    let mut config = test_config();
    config.session.timeout_secs = 1;
    let proxy = ProxyHarness::start_with(config).await;
    let session = proxy.subscribe().await;

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (status, body) = proxy.post_json("/get-headers", &session, None).await;
    assert_eq!(status, 401);
    assert_eq!(body["error_type"], "InvalidSession");
    assert!(proxy.store.is_empty());
}

#[tokio::test]
async fn test_health_check_reports_connectivity() {
    let target = start_target().await;
    let mut config = test_config();
    config.health.probe_url = format!("http://{target}/echo");
    let proxy = ProxyHarness::start_with(config).await;

    let res = proxy.client.get(proxy.url("/health-check")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "OK");
    assert_eq!(body["internet"], true);
    assert!(body["response_time_ms"].is_number());

    let mut config = test_config();
    config.health.probe_url = format!("http://127.0.0.1:{}/", closed_port());
    let proxy = ProxyHarness::start_with(config).await;

    let res = proxy.client.get(proxy.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "Service Unavailable");
    assert_eq!(body["internet"], false);
    assert_eq!(body["server_info"]["error_type"], "ConnectionError");
}

#[tokio::test]
async fn test_unexpected_probe_status_is_unavailable() {
    let target = start_target().await;
    let mut config = test_config();
    config.health.probe_url = format!("http://{target}/status/500");
    let proxy = ProxyHarness::start_with(config).await;

    let res = proxy.client.get(proxy.url("/health-check")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["server_info"]["error_type"], "UnexpectedStatus");
}
