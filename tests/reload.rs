//! Route table reloads while traffic is flowing.

mod common;

use std::time::Duration;

use common::{eventually, get_json, spawn_tcp_backend, write_config};
use switchyard::config::{load_config, ReloadTrigger};

fn single_route(target: &str) -> String {
    format!(
        r#"
        [[servers]]
        name = "app"
        hosts = ["app.example.com"]

        [[servers.routes]]
        path = "/"
        proxy = "{target}"
        "#
    )
}

#[tokio::test]
async fn test_in_flight_request_keeps_its_snapshot() {
    let blue = spawn_tcp_backend("blue").await;
    let green = spawn_tcp_backend("green").await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("switchyard.toml");
    write_config(&path, &single_route(&blue.target));

    let config = load_config(&path).unwrap();
    let proxy = switchyard::start(config, Some(path.clone())).await.unwrap();
    assert_eq!(proxy.routes.generation(), 1);

    let addr = proxy.http_addr;
    let in_flight = tokio::spawn(async move { get_json(addr, "app.example.com", "/slow").await });
    // reload only once the request has reached its target
    assert!(eventually(|| blue.hits() == 1).await);

    write_config(&path, &single_route(&green.target));
    let generation = proxy.reloader.reload(ReloadTrigger::Admin).unwrap();
    assert!(generation >= 2);

    // matched before the swap, so it finishes against the old table
    let (status, body) = in_flight.await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["backend"], "blue");

    let (status, body) = get_json(addr, "app.example.com", "/").await;
    assert_eq!(status, 200);
    assert_eq!(body["backend"], "green");

    let targets: Vec<String> = proxy.pool.statuses().into_iter().map(|s| s.address).collect();
    assert_eq!(targets, vec![green.target.clone()]);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_rejected_reload_keeps_serving() {
    let blue = spawn_tcp_backend("blue").await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("switchyard.toml");
    write_config(&path, &single_route(&blue.target));

    let config = load_config(&path).unwrap();
    let proxy = switchyard::start(config, Some(path.clone())).await.unwrap();
    let before = proxy.routes.generation();

    // same host claimed by two blocks
    write_config(
        &path,
        &format!(
            "{}\n{}",
            single_route(&blue.target),
            single_route(&blue.target).replace("name = \"app\"", "name = \"copy\"")
        ),
    );
    assert!(proxy.reloader.reload(ReloadTrigger::Signal).is_err());
    assert_eq!(proxy.routes.generation(), before);

    let (status, body) = get_json(proxy.http_addr, "app.example.com", "/").await;
    assert_eq!(status, 200);
    assert_eq!(body["backend"], "blue");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_file_change_triggers_reload() {
    let blue = spawn_tcp_backend("blue").await;
    let green = spawn_tcp_backend("green").await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("switchyard.toml");
    write_config(&path, &single_route(&blue.target));

    let config = load_config(&path).unwrap();
    let proxy = switchyard::start(config, Some(path.clone())).await.unwrap();

    write_config(&path, &single_route(&green.target));

    let mut switched = false;
    for _ in 0..50 {
        let (_, body) = get_json(proxy.http_addr, "app.example.com", "/").await;
        if body["backend"] == "green" {
            switched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(switched, "watcher never installed the new table");
    assert!(proxy.routes.generation() >= 2);

    proxy.shutdown().await;
}
