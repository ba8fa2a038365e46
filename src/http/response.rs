//! Response construction.
//!
//! # Responsibilities
//! - Stream static files with a content type
//! - Render 404 pages, registry diagnostics and directory listings
//! - Redirect secured sites to HTTPS
//!
//! # Design Decisions
//! - Static files go through `ServeFile` (content type, ranges, conditional requests)
//! - Error bodies are small and self-contained; nothing is read from disk to render them

use std::fmt::Write;
use std::path::Path;

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::dispatch::DispatchError;
use crate::fs::{EntryKind, FileSystem};

/// Characters escaped in a path segment of a listing link.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>404 - Not Found</title></head>\
<body><h1>404 - Not Found</h1><p>No site or front controller matches this request.</p></body></html>\n";

pub fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        NOT_FOUND_PAGE,
    )
        .into_response()
}

/// 500 naming the unusable registry and why.
pub fn configuration_corrupt(err: &DispatchError) -> Response {
    let mut body = format!("devhost cannot serve requests: {err}\n");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let _ = writeln!(body, "  caused by: {cause}");
        source = cause.source();
    }
    body.push_str("Fix or remove the registry file and retry.\n");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub fn bad_gateway(message: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{message}\n"),
    )
        .into_response()
}

pub fn payload_too_large() -> Response {
    (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large\n").into_response()
}

/// 301 to the same host and URI over HTTPS.
pub fn secure_redirect(host: &str, https_port: Option<u16>, request_uri: &str) -> Response {
    let host = crate::dispatch::host::strip_port(host);
    let location = match https_port {
        Some(443) | None => format!("https://{host}{request_uri}"),
        Some(port) => format!("https://{host}:{port}{request_uri}"),
    };
    match HeaderValue::from_str(&location) {
        Ok(value) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// Stream `path` in answer to `request`.
pub async fn serve_file<B>(path: &Path, request: Request<B>) -> Response
where
    B: Send + 'static,
{
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(err) => match err {},
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// HTML index of `dir`. `request_path` is the path as the client sent it, so links
/// resolve back to the same site whatever the driver did to the URI.
pub fn directory_listing(fs: &dyn FileSystem, dir: &Path, request_path: &str) -> Response {
    let entries = match fs.read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = ?dir, error = %e, "Directory listing failed");
            return not_found();
        }
    };

    let base = if request_path.ends_with('/') {
        request_path.to_string()
    } else {
        format!("{request_path}/")
    };
    let title = escape_html(&percent_decode_str(&base).decode_utf8_lossy());
    let href_base = escape_html(&base);
    let mut html = format!(
        "<!DOCTYPE html>\n<html><head><title>Index of {title}</title></head><body><h1>Index of {title}</h1><ul>"
    );

    if base != "/" {
        html.push_str("<li><a href=\"..\">..</a></li>");
    }

    for entry in entries.iter().filter(|e| !e.name.starts_with('.')) {
        let suffix = if entry.kind == Some(EntryKind::Dir) { "/" } else { "" };
        let href = utf8_percent_encode(&entry.name, SEGMENT);
        let _ = write!(
            html,
            "<li><a href=\"{href_base}{href}{suffix}\">{}{suffix}</a></li>",
            escape_html(&entry.name)
        );
    }

    html.push_str("</ul></body></html>\n");
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}
