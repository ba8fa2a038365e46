//! Failure injection: broken registry, dead upstreams, unreadable projects, bad drivers.

use reqwest::header::HOST;
use reqwest::StatusCode;

use devhost::config::ServerConfig;

mod common;

use common::{client, spawn_server, unused_addr, Fixture};

#[tokio::test]
async fn corrupt_registry_is_reported_on_every_request() {
    let fixture = Fixture::new();
    fixture.park_code();
    fixture.write("blog/index.html", "blog");
    let server = spawn_server(&fixture, ServerConfig::default()).await;

    std::fs::write(fixture.registry_path(), "{ \"tld\": ").unwrap();

    for host in ["blog.test", "anything.test"] {
        let response = client()
            .get(server.url("/"))
            .header(HOST, host)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.text().await.unwrap();
        assert!(body.contains(&fixture.registry_path().display().to_string()), "{body}");
        assert!(body.contains("caused by"));
    }

    // Fixing the file is enough; no restart.
    std::fs::remove_file(fixture.registry_path()).unwrap();
    fixture.park_code();
    let response = client()
        .get(server.url("/"))
        .header(HOST, "blog.test")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    let fixture = Fixture::new();
    let dead = unused_addr().await;
    fixture
        .store
        .add_proxy("api", &format!("http://{dead}"), false)
        .unwrap();
    let server = spawn_server(&fixture, ServerConfig::default()).await;

    let response = client()
        .get(server.url("/health"))
        .header(HOST, "api.test")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn missing_runtime_binary_is_a_bad_gateway() {
    let fixture = Fixture::new();
    fixture.park_code();
    fixture.write("blog/artisan", "");
    fixture.write("blog/public/index.php", "<?php");
    let mut config = ServerConfig::default();
    config.runtime.default_binary = "/nonexistent/devhost/php-cgi".to_string();
    let server = spawn_server(&fixture, config).await;

    let response = client()
        .get(server.url("/"))
        .header(HOST, "blog.test")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_project_does_not_block_other_sites() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    fixture.park_code();
    fixture.write("locked/notes.txt", "private");
    fixture.write("open/index.html", "open");
    let locked = fixture.code.join("locked");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    let server = spawn_server(&fixture, ServerConfig::default()).await;

    let locked_response = client()
        .get(server.url("/"))
        .header(HOST, "locked.test")
        .send()
        .await
        .unwrap();
    let open_response = client()
        .get(server.url("/"))
        .header(HOST, "open.test")
        .send()
        .await
        .unwrap();

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(locked_response.status(), StatusCode::NOT_FOUND);
    assert_eq!(open_response.status(), StatusCode::OK);
    assert_eq!(open_response.text().await.unwrap(), "open");
}

#[tokio::test]
async fn broken_custom_driver_is_skipped() {
    let fixture = Fixture::new();
    fixture.park_code();
    let drivers = fixture.store.drivers_dir();
    std::fs::write(drivers.join("BrokenDriver.toml"), "markers = [").unwrap();
    std::fs::write(
        drivers.join("HugoDriver.toml"),
        "markers = [\"hugo.toml\"]\npublic_dir = \"public\"\nfront_controller = \"public/index.html\"\n",
    )
    .unwrap();
    fixture.write("site/hugo.toml", "");
    fixture.write("site/public/index.html", "hugo home");
    fixture.write("site/public/app.js", "console.log(1)");
    let server = spawn_server(&fixture, ServerConfig::default()).await;

    let home = client()
        .get(server.url("/"))
        .header(HOST, "site.test")
        .send()
        .await
        .unwrap();
    assert_eq!(home.status(), StatusCode::OK);
    assert_eq!(home.text().await.unwrap(), "hugo home");

    let asset = client()
        .get(server.url("/app.js"))
        .header(HOST, "site.test")
        .send()
        .await
        .unwrap();
    assert_eq!(asset.text().await.unwrap(), "console.log(1)");
}

#[tokio::test]
async fn missing_host_is_a_bad_request() {
    let fixture = Fixture::new();
    let server = spawn_server(&fixture, ServerConfig::default()).await;

    // HTTP/1.0 without a Host header.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let reply = String::from_utf8_lossy(&reply);
    let status_line = reply.lines().next().unwrap_or_default();
    assert!(status_line.contains(" 400 "), "{reply}");
}
