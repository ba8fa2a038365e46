//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use devhost::config::ServerConfig;
use devhost::fs::RealFs;
use devhost::sites::BindingStore;
use devhost::{lifecycle, Dispatcher, HttpServer, Shutdown};

/// A temporary home directory plus a directory for project checkouts.
pub struct Fixture {
    _dir: TempDir,
    pub home: PathBuf,
    pub code: PathBuf,
    pub store: BindingStore,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let home = root.join("home");
        let code = root.join("code");
        std::fs::create_dir_all(&code).unwrap();

        let store = BindingStore::new(Arc::new(RealFs::new()), &home);
        store.ensure_base().unwrap();

        Self {
            _dir: dir,
            home,
            code,
            store,
        }
    }

    /// Write `contents` to `rel` under the code directory, creating parents.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.code.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let path = self.code.join(rel);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    /// Park the code directory.
    pub fn park_code(&self) {
        self.store.add_parked_root(&self.code).unwrap();
    }

    pub fn registry_path(&self) -> PathBuf {
        self.store.registry_path()
    }

    /// An executable shell script standing in for the CGI runtime. It echoes what it was
    /// given as a plain-text CGI response.
    #[cfg(unix)]
    pub fn fake_runtime(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.home.join("fake-cgi.sh");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             body=$(cat)\n\
             printf 'Status: 200 OK\\r\\nContent-Type: text/plain\\r\\nX-Script: %s\\r\\n\\r\\n' \"$SCRIPT_FILENAME\"\n\
             printf 'method=%s uri=%s host=%s cwd=%s env=%s body=%s' \"$REQUEST_METHOD\" \"$REQUEST_URI\" \"$HTTP_HOST\" \"$(pwd)\" \"$APP_NAME\" \"$body\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

/// A server running on an ephemeral port until dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the server for `fixture` with `config`.
pub async fn spawn_server(fixture: &Fixture, config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (drivers, _) = lifecycle::prepare(&fixture.store).unwrap();
    let dispatcher = Dispatcher::new(fixture.store.clone(), Arc::new(drivers));
    let server = HttpServer::new(Arc::new(ArcSwap::from_pointee(config)), dispatcher);

    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.serve(listener, None, stop).await;
    });

    TestServer { addr, shutdown }
}

/// HTTP client that does not follow redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Start a mock upstream that answers every request with its own request line and
/// headers as the body. Returns its address.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let body = String::from_utf8_lossy(&head).to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
