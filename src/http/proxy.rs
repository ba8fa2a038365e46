//! Forwarding of proxy-bound sites to their upstream.
//!
//! # Responsibilities
//! - Rewrite the effective request URI (after IP-host recovery) onto the upstream
//!   authority, keeping path and query
//! - Strip hop-by-hop headers in both directions
//! - Add `X-Forwarded-For`, `X-Forwarded-Host` and `X-Forwarded-Proto`
//!
//! # Design Decisions
//! - One attempt per request; an unreachable upstream is a 502, never retried
//! - The client `Host` header is passed through unchanged

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        header,
        uri::{Authority, Parts, PathAndQuery, Scheme},
        HeaderMap, HeaderName, HeaderValue, Request, Response, Uri,
    },
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::sites::ProxyTarget;

pub type UpstreamClient = Client<HttpConnector, Body>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {url} is not a valid URL: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("upstream {0} uses a scheme other than http")]
    UnsupportedScheme(String),

    #[error("upstream {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

/// Build the shared upstream client.
pub fn build_client(connect_timeout: Duration) -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    Client::builder(TokioExecutor::new()).build(connector)
}

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// The URI `request_uri` (path and query) maps to on `target`. The upstream's own path,
/// if any, prefixes the request path.
pub fn upstream_uri(target: &ProxyTarget, request_uri: &str) -> Result<Uri, ProxyError> {
    let url = url::Url::parse(&target.url).map_err(|e| ProxyError::InvalidUpstream {
        url: target.url.clone(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" {
        return Err(ProxyError::UnsupportedScheme(target.url.clone()));
    }
    let host = url.host_str().ok_or_else(|| ProxyError::InvalidUpstream {
        url: target.url.clone(),
        reason: "no host".to_string(),
    })?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let prefix = url.path().trim_end_matches('/');
    let path_and_query = if request_uri.starts_with('/') {
        request_uri.to_string()
    } else {
        format!("/{request_uri}")
    };
    let full = format!("{prefix}{path_and_query}");

    let mut parts = Parts::default();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(Authority::from_str(&authority).map_err(|e| {
        ProxyError::InvalidUpstream {
            url: target.url.clone(),
            reason: e.to_string(),
        }
    })?);
    parts.path_and_query = Some(PathAndQuery::from_str(&full).map_err(|e| {
        ProxyError::InvalidUpstream {
            url: target.url.clone(),
            reason: e.to_string(),
        }
    })?);
    Uri::from_parts(parts).map_err(|e| ProxyError::InvalidUpstream {
        url: target.url.clone(),
        reason: e.to_string(),
    })
}

/// Forwarding context for one request.
#[derive(Debug, Clone)]
pub struct Forwarded<'a> {
    /// Effective path and query to request from the upstream.
    pub request_uri: &'a str,
    pub remote_addr: SocketAddr,
    pub host: &'a str,
    pub https: bool,
}

fn add_forwarded_headers(headers: &mut HeaderMap, forwarded: &Forwarded<'_>) {
    let client_ip = forwarded.remote_addr.ip().to_string();
    let chain = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert("x-forwarded-for", value);
    }
    if !headers.contains_key("x-forwarded-host") {
        if let Ok(value) = HeaderValue::from_str(forwarded.host) {
            headers.insert("x-forwarded-host", value);
        }
    }
    let proto = if forwarded.https { "https" } else { "http" };
    headers.insert("x-forwarded-proto", HeaderValue::from_static(proto));
}

/// Send `request` to `target` and relay the answer.
pub async fn forward(
    client: &UpstreamClient,
    target: &ProxyTarget,
    request: Request<Body>,
    forwarded: &Forwarded<'_>,
) -> Result<Response<Body>, ProxyError> {
    let (mut parts, body) = request.into_parts();
    parts.uri = upstream_uri(target, forwarded.request_uri)?;
    strip_hop_by_hop(&mut parts.headers);
    add_forwarded_headers(&mut parts.headers, forwarded);

    tracing::debug!(upstream = %parts.uri, "Forwarding to upstream");

    let response = client
        .request(Request::from_parts(parts, body))
        .await
        .map_err(|source| ProxyError::Unreachable {
            url: target.url.clone(),
            source,
        })?;

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> ProxyTarget {
        ProxyTarget::new(url, false)
    }

    #[test]
    fn path_and_query_are_kept() {
        let uri = upstream_uri(&target("http://127.0.0.1:3000"), "/api/users?page=2").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:3000/api/users?page=2");
    }

    #[test]
    fn upstream_path_prefixes_request_path() {
        let uri = upstream_uri(&target("http://localhost:8000/app/"), "/users").unwrap();
        assert_eq!(uri.to_string(), "http://localhost:8000/app/users");
    }

    #[test]
    fn https_upstreams_are_rejected() {
        assert!(matches!(
            upstream_uri(&target("https://example.com"), "/"),
            Err(ProxyError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-internal"));
        headers.insert("x-internal", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn forwarded_headers_extend_the_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        let forwarded = Forwarded {
            request_uri: "/",
            remote_addr: "127.0.0.1:5555".parse().unwrap(),
            host: "app.test",
            https: true,
        };

        add_forwarded_headers(&mut headers, &forwarded);

        assert_eq!(headers["x-forwarded-for"], "10.0.0.1, 127.0.0.1");
        assert_eq!(headers["x-forwarded-host"], "app.test");
        assert_eq!(headers["x-forwarded-proto"], "https");
    }
}
