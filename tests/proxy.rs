//! Request forwarding, failures and limits through a running proxy.

mod common;

use std::time::{Duration, Instant};

use common::{
    client, eventually, get, get_json, spawn_hanging_backend, spawn_streaming_backend, spawn_tcp_backend,
    spawn_unix_backend, start_proxy, start_proxy_tuned, target_status,
};
use switchyard::health::HealthState;
use switchyard::http::X_REQUEST_ID;

#[tokio::test]
async fn test_forward_to_unix_socket_rewrites_headers() {
    let dir = tempfile::tempdir().unwrap();
    let app = spawn_unix_backend(dir.path(), "app").await;

    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "app"
        hosts = ["app.example.com"]

        [servers.response_headers]
        access-control-allow-origin = "*"

        [[servers.routes]]
        path = "/"
        proxy = "{}"

        [servers.routes.set_headers]
        x-env = "test"
        "#,
        app.target
    ))
    .await;

    let res = get(proxy.http_addr, "app.example.com", "/users/7?page=2").await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    let request_id = res.headers()[&X_REQUEST_ID].to_str().unwrap().to_string();

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["backend"], "app");
    assert_eq!(body["path"], "/users/7");
    assert_eq!(body["query"], "page=2");

    let headers = &body["headers"];
    assert_eq!(headers["host"], "app.example.com");
    assert_eq!(headers["x-forwarded-host"], "app.example.com");
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["x-real-ip"], "127.0.0.1");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["x-env"], "test");
    assert_eq!(headers["x-request-id"], request_id.as_str());

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_host_override() {
    let app = spawn_tcp_backend("app").await;
    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "app"
        hosts = ["app.example.com"]

        [[servers.routes]]
        path = "/"
        proxy = "http://{}"
        host_override = "internal.local"
        "#,
        app.target
    ))
    .await;

    let (status, body) = get_json(proxy.http_addr, "app.example.com:8080", "/").await;
    assert_eq!(status, 200);
    assert_eq!(body["headers"]["host"], "internal.local");
    assert_eq!(body["headers"]["x-forwarded-host"], "app.example.com:8080");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_missing_socket_degrades_after_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.sock");
    let target = format!("unix:{}", missing.display());

    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "app"
        hosts = ["app.example.com"]

        [[servers.routes]]
        path = "/"
        proxy = "{target}"
        "#
    ))
    .await;

    let status_of = |proxy: &switchyard::RunningProxy| {
        proxy
            .pool
            .statuses()
            .into_iter()
            .find(|s| s.address == target)
            .unwrap()
    };

    for attempt in 1..=2 {
        let res = get(proxy.http_addr, "app.example.com", "/").await;
        assert_eq!(res.status(), 502, "attempt {attempt}");
        assert_eq!(status_of(&proxy).state, HealthState::Healthy);
    }

    let res = get(proxy.http_addr, "app.example.com", "/").await;
    assert_eq!(res.status(), 502);
    let status = status_of(&proxy);
    assert_eq!(status.state, HealthState::Degraded);
    assert_eq!(status.consecutive_failures, 3);

    // degraded without a backup: rejected without connecting
    let res = get(proxy.http_addr, "app.example.com", "/").await;
    assert_eq!(res.status(), 502);
    assert_eq!(status_of(&proxy).consecutive_failures, 3);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_backup_used_once_primary_degraded() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.sock");
    let backup = spawn_tcp_backend("backup").await;

    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "app"
        hosts = ["app.example.com"]

        [[servers.routes]]
        path = "/"
        proxy = "unix:{}"
        backup = "{}"
        "#,
        missing.display(),
        backup.target
    ))
    .await;

    // no retries: each failure is returned to its client
    for _ in 0..3 {
        let res = get(proxy.http_addr, "app.example.com", "/").await;
        assert_eq!(res.status(), 502);
    }
    assert_eq!(backup.hits(), 0);

    let (status, body) = get_json(proxy.http_addr, "app.example.com", "/").await;
    assert_eq!(status, 200);
    assert_eq!(body["backend"], "backup");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_body_limit_boundary() {
    let app = spawn_tcp_backend("app").await;
    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "upload"
        hosts = ["upload.example.com"]
        max_body_size = "1k"

        [[servers.routes]]
        path = "/"
        proxy = "{}"
        "#,
        app.target
    ))
    .await;

    let url = format!("http://{}/upload", proxy.http_addr);

    let res = client()
        .post(&url)
        .header("host", "upload.example.com")
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["body_len"], 1024);
    assert_eq!(app.hits(), 1);

    let res = client()
        .post(&url)
        .header("host", "upload.example.com")
        .body(vec![b'x'; 1025])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert_eq!(app.hits(), 1, "oversized body must not reach the target");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_silent_target_times_out() {
    let silent = spawn_hanging_backend().await;
    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "slow"
        hosts = ["slow.example.com"]

        [[servers.routes]]
        path = "/"
        proxy = "{silent}"
        read_timeout_secs = 1
        write_timeout_secs = 1
        "#
    ))
    .await;

    let started = Instant::now();
    let res = get(proxy.http_addr, "slow.example.com", "/").await;
    assert_eq!(res.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());

    let status = proxy
        .pool
        .statuses()
        .into_iter()
        .find(|s| s.address == silent)
        .unwrap();
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.state, HealthState::Healthy);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_require_tls_redirects_plain_requests() {
    let app = spawn_tcp_backend("app").await;
    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "secure"
        hosts = ["secure.example.com"]
        require_tls = true

        [[servers.routes]]
        path = "/"
        proxy = "{}"
        "#,
        app.target
    ))
    .await;

    let res = get(proxy.http_addr, "secure.example.com:8080", "/account?tab=1").await;
    assert_eq!(res.status(), 301);
    assert_eq!(res.headers()["location"], "https://secure.example.com/account?tab=1");
    assert_eq!(app.hits(), 0);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_redirect_template_variables() {
    let proxy = start_proxy(
        r#"
        [[servers]]
        name = "legacy"
        hosts = ["old.example.com"]

        [[servers.routes]]
        path = "/"
        redirect = "$scheme://www.example.com$uri?from=$host"
        redirect_status = 302
        "#,
    )
    .await;

    let res = get(proxy.http_addr, "old.example.com", "/docs/intro?x=1").await;
    assert_eq!(res.status(), 302);
    assert_eq!(
        res.headers()["location"],
        "http://www.example.com/docs/intro?from=old.example.com"
    );

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_wildcard_path_redirect_substitutes_uri() {
    let proxy = start_proxy(
        r#"
        [[servers]]
        name = "a"
        hosts = ["a.example.com"]

        [[servers.routes]]
        path = "/*"
        redirect = "https://b.example.com$uri"
        "#,
    )
    .await;

    let res = get(proxy.http_addr, "a.example.com", "/x").await;
    assert_eq!(res.status(), 301);
    assert_eq!(res.headers()["location"], "https://b.example.com/x");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_connection_reused_after_clean_completion() {
    let app = spawn_tcp_backend("app").await;
    let proxy = start_proxy(&format!(
        r#"
        [[servers]]
        name = "app"
        hosts = ["app.example.com"]

        [[servers.routes]]
        path = "/"
        proxy = "{}"
        "#,
        app.target
    ))
    .await;

    for _ in 0..3 {
        let (status, _) = get_json(proxy.http_addr, "app.example.com", "/").await;
        assert_eq!(status, 200);
    }
    assert_eq!(app.hits(), 3);

    // sequential requests share one connection through the free list
    let status = target_status(&proxy, &app.target);
    assert_eq!(status.idle_connections, 1);
    assert_eq!(status.active_connections, 0);

    proxy.shutdown().await;
}

fn request_deadline_of_one_second() -> [(&'static str, &'static str); 1] {
    [("request_secs = 5", "request_secs = 1")]
}

#[tokio::test]
async fn test_request_deadline_before_head() {
    let silent = spawn_hanging_backend().await;
    let proxy = start_proxy_tuned(
        &request_deadline_of_one_second(),
        &format!(
            r#"
            [[servers]]
            name = "slow"
            hosts = ["slow.example.com"]

            [[servers.routes]]
            path = "/"
            proxy = "{silent}"
            read_timeout_secs = 10
            write_timeout_secs = 10
            "#
        ),
    )
    .await;

    let started = Instant::now();
    let res = get(proxy.http_addr, "slow.example.com", "/").await;
    assert_eq!(res.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());

    proxy.shutdown().await;
}

fn streaming_server(target: &str) -> String {
    format!(
        r#"
        [[servers]]
        name = "stream"
        hosts = ["stream.example.com"]

        [[servers.routes]]
        path = "/"
        proxy = "{target}"
        "#
    )
}

#[tokio::test]
async fn test_request_deadline_aborts_stream() {
    let target = spawn_streaming_backend().await;
    let proxy = start_proxy_tuned(&request_deadline_of_one_second(), &streaming_server(&target)).await;

    let started = Instant::now();
    let res = get(proxy.http_addr, "stream.example.com", "/ticks").await;
    assert_eq!(res.status(), 200);
    assert!(res.bytes().await.is_err(), "stream outlived the request deadline");
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());

    assert!(eventually(|| target_status(&proxy, &target).active_connections == 0).await);
    let status = target_status(&proxy, &target);
    assert_eq!(status.idle_connections, 0);
    assert_eq!(status.consecutive_failures, 0);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_request_deadline_applies_to_slow_reader() {
    let target = spawn_streaming_backend().await;
    let proxy = start_proxy_tuned(&request_deadline_of_one_second(), &streaming_server(&target)).await;

    // the target has the whole body ready; only the client is slow
    let res = get(proxy.http_addr, "stream.example.com", "/big").await;
    assert_eq!(res.status(), 200);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(res.bytes().await.is_err(), "slow reader outlived the request deadline");

    assert!(eventually(|| target_status(&proxy, &target).active_connections == 0).await);
    assert_eq!(target_status(&proxy, &target).idle_connections, 0);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_client_disconnect_discards_connection() {
    let target = spawn_streaming_backend().await;
    let proxy = start_proxy(&streaming_server(&target)).await;

    let res = get(proxy.http_addr, "stream.example.com", "/ticks").await;
    assert_eq!(res.status(), 200);
    assert_eq!(target_status(&proxy, &target).active_connections, 1);
    drop(res);

    assert!(eventually(|| target_status(&proxy, &target).active_connections == 0).await);
    let status = target_status(&proxy, &target);
    assert_eq!(status.idle_connections, 0);
    assert_eq!(status.consecutive_failures, 0);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_upstream_error_mid_stream_discards_connection() {
    let target = spawn_streaming_backend().await;
    let proxy = start_proxy(&streaming_server(&target)).await;

    let res = get(proxy.http_addr, "stream.example.com", "/broken").await;
    assert_eq!(res.status(), 200);
    assert!(res.bytes().await.is_err());

    assert!(eventually(|| target_status(&proxy, &target).active_connections == 0).await);
    let status = target_status(&proxy, &target);
    assert_eq!(status.idle_connections, 0);
    assert_eq!(status.consecutive_failures, 1);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_streaming_response_holds_in_flight_slot() {
    let target = spawn_streaming_backend().await;
    let proxy = start_proxy_tuned(
        &[("max_connections = 100", "max_connections = 1")],
        &streaming_server(&target),
    )
    .await;
    let url = format!("http://{}/ticks", proxy.http_addr);
    let attempt = || {
        client()
            .get(&url)
            .header("host", "stream.example.com")
            .timeout(Duration::from_millis(500))
            .send()
    };

    let streaming = get(proxy.http_addr, "stream.example.com", "/ticks").await;
    assert_eq!(streaming.status(), 200);

    // the first response is still streaming, so the only slot is taken
    assert!(attempt().await.is_err());

    drop(streaming);
    let mut admitted = false;
    for _ in 0..20 {
        if let Ok(res) = attempt().await {
            assert_eq!(res.status(), 200);
            admitted = true;
            break;
        }
    }
    assert!(admitted, "slot was never released");

    proxy.shutdown().await;
}
