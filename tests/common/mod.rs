//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::routing::get as route_get;
use axum::Json;
use axum::Router;
use bytes::Bytes;
use futures_util::stream;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener};

use switchyard::config::parse_config;
use switchyard::RunningProxy;

/// Listener, timeout and health settings shared by every test proxy.
pub const BASE: &str = r#"
[listener]
bind_address = "127.0.0.1:0"
max_connections = 100
max_body_size = "1m"

[timeouts]
connect_secs = 1
read_secs = 2
write_secs = 2
request_secs = 5
shutdown_grace_secs = 1

[health_check]
enabled = true
interval_secs = 60
timeout_secs = 1
unhealthy_threshold = 3
failure_window_secs = 30
"#;

pub const SLOW: Duration = Duration::from_millis(500);

/// A running echo backend.
pub struct Backend {
    /// Target string for the proxy config.
    pub target: String,
    pub hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct Echo {
    name: &'static str,
    hits: Arc<AtomicUsize>,
}

/// Answers every request with what it received as JSON. Paths under
/// `/slow` answer after `SLOW`.
async fn echo(State(echo): State<Echo>, request: Request) -> Json<Value> {
    echo.hits.fetch_add(1, Ordering::SeqCst);
    let (parts, body) = request.into_parts();
    if parts.uri.path().starts_with("/slow") {
        tokio::time::sleep(SLOW).await;
    }
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();

    let headers: BTreeMap<String, String> = parts
        .headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    Json(json!({
        "backend": echo.name,
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "headers": headers,
        "body_len": body.len(),
    }))
}

fn echo_app(name: &'static str) -> (Router, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().fallback(echo).with_state(Echo {
        name,
        hits: hits.clone(),
    });
    (app, hits)
}

pub async fn spawn_tcp_backend(name: &'static str) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (app, hits) = echo_app(name);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Backend {
        target: addr.to_string(),
        hits,
    }
}

pub async fn spawn_unix_backend(dir: &Path, name: &'static str) -> Backend {
    let path = dir.join(format!("{name}.sock"));
    let listener = UnixListener::bind(&path).unwrap();
    let (app, hits) = echo_app(name);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Backend {
        target: format!("unix:{}", path.display()),
        hits,
    }
}

/// Accepts connections and reads forever without answering.
pub async fn spawn_hanging_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    addr.to_string()
}

pub const TICK: Duration = Duration::from_millis(100);

/// Backend with bodies that misbehave while streaming:
/// - `/ticks` sends a line every `TICK` and never ends
/// - `/big` sends 64 MiB as fast as the reader takes it
/// - `/broken` sends one line, then fails the connection
pub async fn spawn_streaming_backend() -> String {
    let app = Router::new()
        .route(
            "/ticks",
            route_get(|| async {
                Body::from_stream(stream::unfold((), |()| async {
                    tokio::time::sleep(TICK).await;
                    Some((Ok::<_, std::io::Error>(Bytes::from_static(b"tick\n")), ()))
                }))
            }),
        )
        .route("/big", route_get(|| async { Body::from(vec![b'x'; 64 << 20]) }))
        .route(
            "/broken",
            route_get(|| async {
                Body::from_stream(stream::unfold(0u8, |sent| async move {
                    match sent {
                        0 => Some((Ok(Bytes::from_static(b"partial\n")), 1)),
                        1 => {
                            tokio::time::sleep(TICK).await;
                            Some((Err(std::io::Error::other("backend crashed")), 2))
                        }
                        _ => None,
                    }
                }))
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr.to_string()
}

/// `BASE` followed by the given server blocks.
pub fn config_text(servers: &str) -> String {
    format!("{BASE}\n{servers}")
}

/// Write `BASE` plus `servers` to `path`.
pub fn write_config(path: &Path, servers: &str) {
    std::fs::write(path, config_text(servers)).unwrap();
}

pub async fn start_proxy(servers: &str) -> RunningProxy {
    start_proxy_tuned(&[], servers).await
}

/// Like `start_proxy`, with `(from, to)` line replacements applied to `BASE`.
pub async fn start_proxy_tuned(tuning: &[(&str, &str)], servers: &str) -> RunningProxy {
    let mut text = config_text(servers);
    for (from, to) in tuning {
        assert!(text.contains(from), "{from:?} is not in the base config");
        text = text.replace(from, to);
    }
    let config = parse_config(&text).unwrap();
    switchyard::start(config, None).await.unwrap()
}

/// Send `request` verbatim and read until the proxy closes the connection.
pub async fn raw_request(proxy: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Target status for `address`, e.g. to inspect the free list.
pub fn target_status(proxy: &RunningProxy, address: &str) -> switchyard::upstream::TargetStatus {
    proxy
        .pool
        .statuses()
        .into_iter()
        .find(|s| s.address == address)
        .unwrap()
}

/// Poll `condition` every 20ms for up to 5s.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Client that keeps explicit Host headers and never follows redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

pub async fn get(proxy: SocketAddr, host: &str, path: &str) -> reqwest::Response {
    client()
        .get(format!("http://{proxy}{path}"))
        .header("host", host)
        .send()
        .await
        .unwrap()
}

pub async fn get_json(proxy: SocketAddr, host: &str, path: &str) -> (u16, Value) {
    let res = get(proxy, host, path).await;
    let status = res.status().as_u16();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}
