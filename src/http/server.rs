//! HTTP server setup and request handling.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all site handler
//! - Wire up middleware (tracing, request ID)
//! - Serve plain HTTP and, when configured, HTTPS
//! - Dispatch each request and carry out the resulting action
//! - Record per-action request metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::dispatch::host::is_php;
use crate::dispatch::{Action, Dispatcher, ResolvedRequest};
use crate::http::cgi::{self, CgiRequest};
use crate::http::proxy::{self, Forwarded, UpstreamClient};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestIdExt};
use crate::http::response;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Grace period for in-flight TLS connections after shutdown is triggered.
const TLS_DRAIN: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<ServerConfig>>,
    pub dispatcher: Dispatcher,
    pub client: UpstreamClient,
    /// Whether this router serves the TLS listener.
    pub tls: bool,
    /// Local port of the listener this router serves.
    pub port: u16,
    /// Port to redirect secured sites to, when HTTPS is available.
    pub https_port: Option<u16>,
}

/// A TLS listener ready to serve.
pub struct TlsListener {
    pub address: SocketAddr,
    pub config: RustlsConfig,
}

/// HTTP front-end for all bound sites.
pub struct HttpServer {
    config: Arc<ArcSwap<ServerConfig>>,
    dispatcher: Dispatcher,
    client: UpstreamClient,
}

impl HttpServer {
    pub fn new(config: Arc<ArcSwap<ServerConfig>>, dispatcher: Dispatcher) -> Self {
        let connect_timeout = Duration::from_secs(config.load().timeouts.proxy_connect_secs);
        Self {
            config,
            dispatcher,
            client: proxy::build_client(connect_timeout),
        }
    }

    fn state(&self, tls: bool, port: u16, https_port: Option<u16>) -> AppState {
        AppState {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
            client: self.client.clone(),
            tls,
            port,
            https_port,
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(site_handler))
            .route("/", any(site_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run until a shutdown signal, accepting plain HTTP on `listener` and HTTPS on `tls`.
    pub async fn run(self, listener: TcpListener, tls: Option<TlsListener>) -> Result<(), std::io::Error> {
        let shutdown = Shutdown::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            crate::lifecycle::signals::shutdown_signal().await;
            signal.trigger();
        });
        self.serve(listener, tls, shutdown).await
    }

    /// Like [`HttpServer::run`], stopping when `shutdown` is triggered.
    pub async fn serve(
        self,
        listener: TcpListener,
        tls: Option<TlsListener>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let https_port = tls.as_ref().map(|t| t.address.port());

        let plain = Self::build_router(self.state(false, addr.port(), https_port))
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut plain_shutdown = shutdown.subscribe();

        tracing::info!(address = %addr, "HTTP server starting");
        let plain_task = axum::serve(listener, plain).with_graceful_shutdown(async move {
            let _ = plain_shutdown.recv().await;
        });

        match tls {
            None => plain_task.await?,
            Some(tls) => {
                let app = Self::build_router(self.state(true, tls.address.port(), https_port))
                    .into_make_service_with_connect_info::<SocketAddr>();
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                let mut tls_shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    let _ = tls_shutdown.recv().await;
                    drain.graceful_shutdown(Some(TLS_DRAIN));
                });

                tracing::info!(address = %tls.address, "HTTPS server starting");
                let tls_task = axum_server::bind_rustls(tls.address, tls.config)
                    .handle(handle)
                    .serve(app);
                tokio::try_join!(async { plain_task.await }, tls_task)?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: every request, whatever its path, belongs to some site.
async fn site_handler(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let config = state.config.load_full();
    let request_id = request.request_id();
    let limit = Duration::from_secs(config.timeouts.request_secs);

    match tokio::time::timeout(limit, handle(&state, &config, remote_addr, request)).await {
        Ok((action, response)) => {
            metrics::record_request(action, response.status().as_u16(), start);
            response
        }
        Err(_) => {
            tracing::warn!(request_id = %request_id, timeout = ?limit, "Request timed out");
            metrics::record_request("timeout", StatusCode::REQUEST_TIMEOUT.as_u16(), start);
            StatusCode::REQUEST_TIMEOUT.into_response()
        }
    }
}

async fn handle(
    state: &AppState,
    config: &ServerConfig,
    remote_addr: SocketAddr,
    request: Request<Body>,
) -> (&'static str, Response) {
    let request_id = request.request_id();
    let Some(host) = request.target_host() else {
        return ("bad_request", (StatusCode::BAD_REQUEST, "Missing Host header\n").into_response());
    };
    let request_uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let dispatcher = state.dispatcher.clone();
    let (lookup_host, lookup_uri) = (host.clone(), request_uri.clone());
    let outcome = tokio::task::spawn_blocking(move || dispatcher.dispatch(&lookup_host, &lookup_uri)).await;

    let resolved = match outcome {
        Ok(Ok(resolved)) => resolved,
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, error = %e, "Cannot read site registry");
            return ("error", response::configuration_corrupt(&e));
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Dispatch task failed");
            return ("error", StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    tracing::debug!(
        request_id = %request_id,
        site = %resolved.site_name,
        driver = resolved.driver.as_deref().unwrap_or("-"),
        uri = %resolved.uri,
        action = resolved.action.label(),
        "Request dispatched"
    );

    if resolved.is_secure() && !state.tls {
        if let Some(port) = state.https_port {
            return ("redirect", response::secure_redirect(&host, Some(port), &request_uri));
        }
    }

    let label = resolved.action.label();
    let response = perform(state, config, remote_addr, &request_id, &resolved, request).await;
    (label, response)
}

async fn perform(
    state: &AppState,
    config: &ServerConfig,
    remote_addr: SocketAddr,
    request_id: &str,
    resolved: &ResolvedRequest,
    request: Request<Body>,
) -> Response {
    match &resolved.action {
        Action::ServeStatic(path) => response::serve_file(path, request).await,
        Action::Dispatch { front_controller } if !is_php(&front_controller.to_string_lossy()) => {
            response::serve_file(front_controller, request).await
        }
        Action::Dispatch { front_controller } => {
            run_front_controller(state, config, remote_addr, request_id, resolved, front_controller, request).await
        }
        Action::ProxyTo(target) => {
            let forwarded = Forwarded {
                request_uri: &resolved.request_uri,
                remote_addr,
                host: &resolved.host,
                https: state.tls,
            };
            match proxy::forward(&state.client, target, request, &forwarded).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(request_id = %request_id, site = %resolved.site_name, error = %e, "Upstream error");
                    response::bad_gateway("Upstream request failed")
                }
            }
        }
        Action::DirectoryListing(dir) => {
            let fs = &**state.dispatcher.store().filesystem();
            let shown = request.uri().path();
            response::directory_listing(fs, dir, shown)
        }
        Action::NotFound => response::not_found(),
    }
}

async fn run_front_controller(
    state: &AppState,
    config: &ServerConfig,
    remote_addr: SocketAddr,
    request_id: &str,
    resolved: &ResolvedRequest,
    script: &std::path::Path,
    request: Request<Body>,
) -> Response {
    let max_body = config.runtime.max_body_bytes;
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_body) {
        return response::payload_too_large();
    }
    let body: Bytes = match axum::body::to_bytes(body, max_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return response::payload_too_large();
        }
    };

    let binary = config.runtime.binary_for(resolved.overrides.runtime.as_deref());
    let cgi_request = CgiRequest {
        script,
        resolved,
        method: &parts.method,
        headers: &parts.headers,
        remote_addr,
        server_port: state.port,
        https: state.tls,
    };

    match cgi::run_script(binary, &cgi_request, body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                site = %resolved.site_name,
                script = ?script,
                binary = %binary,
                error = %e,
                "Front controller failed"
            );
            response::bad_gateway("Front controller failed")
        }
    }
}
