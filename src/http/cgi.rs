//! Front controller execution over CGI/1.1.
//!
//! # Data Flow
//! ```text
//! ResolvedRequest + inbound parts
//!     → environment() (CGI meta-variables, HTTP_* headers, site env)
//!     → run_script() (spawn runtime binary, body on stdin, cwd = script dir)
//!     → parse_cgi_output() (Status/Location/headers, body)
//! ```
//!
//! # Design Decisions
//! - The child gets a cleared environment plus `PATH`; nothing of the server's own
//!   environment leaks into the application
//! - A `Proxy` request header is never exported (it would become `HTTP_PROXY`)
//! - A failed spawn or unparsable output is a `CgiError`; the server answers 502

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode},
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::dispatch::host::{query_of, strip_port};
use crate::dispatch::ResolvedRequest;

#[derive(Debug, Error)]
pub enum CgiError {
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("front controller I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("{binary} exited with {status} and no output: {stderr}")]
    Failed {
        binary: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("malformed CGI output: {0}")]
    MalformedOutput(String),
}

/// One front controller invocation.
#[derive(Debug)]
pub struct CgiRequest<'a> {
    pub script: &'a Path,
    pub resolved: &'a ResolvedRequest,
    pub method: &'a Method,
    pub headers: &'a HeaderMap,
    pub remote_addr: SocketAddr,
    pub server_port: u16,
    pub https: bool,
}

impl CgiRequest<'_> {
    /// The CGI meta-variables for this request.
    pub fn environment(&self) -> Vec<(String, String)> {
        let resolved = self.resolved;
        let document_root = match resolved.site_path() {
            Some(site) => web_root(site, self.script),
            None => self.script.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let request_uri = if resolved.request_uri.starts_with('/') {
            resolved.request_uri.clone()
        } else {
            format!("/{}", resolved.request_uri)
        };

        let mut env = vec![
            ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
            ("SERVER_SOFTWARE".to_string(), concat!("devhost/", env!("CARGO_PKG_VERSION")).to_string()),
            ("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string()),
            ("SERVER_NAME".to_string(), strip_port(&resolved.host).to_string()),
            ("SERVER_PORT".to_string(), self.server_port.to_string()),
            ("REQUEST_METHOD".to_string(), self.method.to_string()),
            ("REQUEST_URI".to_string(), request_uri.clone()),
            ("QUERY_STRING".to_string(), query_of(&request_uri).to_string()),
            ("SCRIPT_FILENAME".to_string(), self.script.display().to_string()),
            ("SCRIPT_NAME".to_string(), script_name(self.script, &document_root)),
            ("DOCUMENT_ROOT".to_string(), document_root.display().to_string()),
            ("REMOTE_ADDR".to_string(), self.remote_addr.ip().to_string()),
            ("REMOTE_PORT".to_string(), self.remote_addr.port().to_string()),
            ("REDIRECT_STATUS".to_string(), "200".to_string()),
            ("HTTP_HOST".to_string(), resolved.host.clone()),
        ];
        if self.https {
            env.push(("HTTPS".to_string(), "on".to_string()));
        }

        for name in self.headers.keys() {
            if *name == axum::http::header::HOST || name.as_str() == "proxy" {
                continue;
            }
            let value = self
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            let key = match name.as_str() {
                "content-type" => "CONTENT_TYPE".to_string(),
                "content-length" => "CONTENT_LENGTH".to_string(),
                other => format!("HTTP_{}", other.to_ascii_uppercase().replace('-', "_")),
            };
            env.push((key, value));
        }

        // Tunnels rewrite Host and report the public one in X-Original-Host.
        if !self.headers.contains_key("x-forwarded-host") {
            if let Some(original) = self
                .headers
                .get("x-original-host")
                .and_then(|v| v.to_str().ok())
            {
                env.push(("HTTP_X_FORWARDED_HOST".to_string(), original.to_string()));
            }
        }

        for (key, value) in resolved.env.iter() {
            env.push((key.to_string(), value.to_string()));
        }
        env
    }
}

/// Directories frameworks serve from instead of the project root.
const WEB_ROOTS: [&str; 6] = ["public", "web", "webroot", "pub", "Web", "docroot"];

/// The site's web root for `script`: the web-root directory the script lives under,
/// else the site directory itself.
fn web_root(site: &Path, script: &Path) -> PathBuf {
    let first = script
        .strip_prefix(site)
        .ok()
        .and_then(|relative| relative.components().next())
        .and_then(|c| match c {
            std::path::Component::Normal(part) => part.to_str(),
            _ => None,
        });
    match first {
        Some(dir) if WEB_ROOTS.contains(&dir) && script.parent() != Some(site) => site.join(dir),
        _ => site.to_path_buf(),
    }
}

fn script_name(script: &Path, document_root: &Path) -> String {
    let relative = script.strip_prefix(document_root).unwrap_or(script);
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    format!("/{}", parts.join("/"))
}

/// Run `binary` for `request`, feeding `body` on stdin.
pub async fn run_script(
    binary: &str,
    request: &CgiRequest<'_>,
    body: Bytes,
) -> Result<Response<Body>, CgiError> {
    let cwd: PathBuf = request
        .script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    let mut command = Command::new(binary);
    command
        .current_dir(&cwd)
        .env_clear()
        .envs(request.environment())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }
    if !request.headers.contains_key(axum::http::header::CONTENT_LENGTH) {
        command.env("CONTENT_LENGTH", body.len().to_string());
    }

    let mut child = command.spawn().map_err(|source| CgiError::Spawn {
        binary: binary.to_string(),
        source,
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&body).await {
                tracing::debug!(error = %e, "Front controller closed stdin early");
            }
        });
    }

    let output = child.wait_with_output().await?;
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        tracing::warn!(script = ?request.script, stderr = %stderr, "Front controller wrote to stderr");
    }
    if output.stdout.is_empty() && !output.status.success() {
        return Err(CgiError::Failed {
            binary: binary.to_string(),
            status: output.status,
            stderr,
        });
    }

    parse_cgi_output(&output.stdout)
}

/// Turn a CGI response (headers, blank line, body) into an HTTP response.
pub fn parse_cgi_output(output: &[u8]) -> Result<Response<Body>, CgiError> {
    let (head, body) = split_head(output)
        .ok_or_else(|| CgiError::MalformedOutput("missing header terminator".to_string()))?;
    let head = std::str::from_utf8(head)
        .map_err(|_| CgiError::MalformedOutput("headers are not UTF-8".to_string()))?;

    let mut status = None;
    let mut headers = HeaderMap::new();
    for line in head.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CgiError::MalformedOutput(format!("bad header line {line:?}")))?;
        let value = value.trim();

        if name.eq_ignore_ascii_case("status") {
            let code = value.split_whitespace().next().unwrap_or_default();
            let code = code
                .parse::<u16>()
                .ok()
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| CgiError::MalformedOutput(format!("bad status {value:?}")))?;
            status = Some(code);
            continue;
        }

        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| CgiError::MalformedOutput(format!("bad header name {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| CgiError::MalformedOutput(format!("bad value for {name}")))?;
        headers.append(name, value);
    }

    let status = status.unwrap_or(if headers.contains_key(axum::http::header::LOCATION) {
        StatusCode::FOUND
    } else {
        StatusCode::OK
    });

    let mut response = Response::new(Body::from(Bytes::copy_from_slice(body)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn split_head(output: &[u8]) -> Option<(&[u8], &[u8])> {
    let crlf = find(output, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(output, b"\n\n").map(|i| (i, 2));
    let (at, len) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&output[..at], &output[at + len..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Action;
    use axum::body::to_bytes;
    use axum::http::header;

    fn resolved(host: &str, request_uri: &str) -> ResolvedRequest {
        let mut resolved = ResolvedRequest::new(
            "blog".to_string(),
            host.to_string(),
            request_uri.to_string(),
            "/".to_string(),
        );
        resolved.site_path = Some(PathBuf::from("/code/blog"));
        resolved.action = Action::Dispatch {
            front_controller: PathBuf::from("/code/blog/public/index.php"),
        };
        resolved.env.set("APP_ENV", "local");
        resolved
    }

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn environment_carries_cgi_variables() {
        let resolved = resolved("blog.test:8080", "/posts/1?draft=yes");
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("blog.test:8080"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-requested-with", HeaderValue::from_static("fetch"));
        headers.insert("proxy", HeaderValue::from_static("http://evil"));
        let method = Method::POST;

        let request = CgiRequest {
            script: Path::new("/code/blog/public/index.php"),
            resolved: &resolved,
            method: &method,
            headers: &headers,
            remote_addr: "127.0.0.1:50000".parse().unwrap(),
            server_port: 8080,
            https: false,
        };
        let env = request.environment();

        assert_eq!(lookup(&env, "REQUEST_METHOD"), Some("POST"));
        assert_eq!(lookup(&env, "REQUEST_URI"), Some("/posts/1?draft=yes"));
        assert_eq!(lookup(&env, "QUERY_STRING"), Some("draft=yes"));
        assert_eq!(lookup(&env, "SCRIPT_FILENAME"), Some("/code/blog/public/index.php"));
        assert_eq!(lookup(&env, "SCRIPT_NAME"), Some("/index.php"));
        assert_eq!(lookup(&env, "DOCUMENT_ROOT"), Some("/code/blog/public"));
        assert_eq!(lookup(&env, "SERVER_NAME"), Some("blog.test"));
        assert_eq!(lookup(&env, "HTTP_HOST"), Some("blog.test:8080"));
        assert_eq!(lookup(&env, "CONTENT_TYPE"), Some("application/json"));
        assert_eq!(lookup(&env, "HTTP_X_REQUESTED_WITH"), Some("fetch"));
        assert_eq!(lookup(&env, "REDIRECT_STATUS"), Some("200"));
        assert_eq!(lookup(&env, "APP_ENV"), Some("local"));
        assert_eq!(lookup(&env, "HTTP_PROXY"), None);
        assert_eq!(lookup(&env, "HTTPS"), None);
    }

    #[test]
    fn document_root_is_the_web_root_holding_the_script() {
        let site = Path::new("/code/blog");
        let cases = [
            ("/code/blog/public/index.php", "/code/blog/public", "/index.php"),
            ("/code/blog/web/typo3/index.php", "/code/blog/web", "/typo3/index.php"),
            ("/code/blog/wp-admin/index.php", "/code/blog", "/wp-admin/index.php"),
            ("/code/blog/panel/index.php", "/code/blog", "/panel/index.php"),
            ("/code/blog/index.php", "/code/blog", "/index.php"),
        ];
        for (script, root, name) in cases {
            let document_root = web_root(site, Path::new(script));
            assert_eq!(document_root, Path::new(root), "{script}");
            assert_eq!(script_name(Path::new(script), &document_root), name, "{script}");
        }
    }

    #[test]
    fn original_host_becomes_forwarded_host() {
        let resolved = resolved("blog.test", "/");
        let mut headers = HeaderMap::new();
        headers.insert("x-original-host", HeaderValue::from_static("abc.tunnel.example"));
        let method = Method::GET;

        let request = CgiRequest {
            script: Path::new("/code/blog/public/index.php"),
            resolved: &resolved,
            method: &method,
            headers: &headers,
            remote_addr: "127.0.0.1:50000".parse().unwrap(),
            server_port: 443,
            https: true,
        };
        let env = request.environment();

        assert_eq!(lookup(&env, "HTTP_X_FORWARDED_HOST"), Some("abc.tunnel.example"));
        assert_eq!(lookup(&env, "HTTPS"), Some("on"));
    }

    #[tokio::test]
    async fn output_with_status_and_headers() {
        let output = b"Status: 404 Not Found\r\nContent-Type: text/plain\r\nX-Powered-By: PHP\r\n\r\nmissing";
        let response = parse_cgi_output(output).unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()["x-powered-by"], "PHP");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"missing");
    }

    #[test]
    fn location_without_status_redirects() {
        let response = parse_cgi_output(b"Location: /login\n\n").unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[test]
    fn repeated_headers_are_kept() {
        let response =
            parse_cgi_output(b"Set-Cookie: a=1\nSet-Cookie: b=2\n\nok").unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn output_without_headers_is_malformed() {
        assert!(matches!(
            parse_cgi_output(b"<h1>hello</h1>"),
            Err(CgiError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_cgi_output(b"Status: teapot\n\n"),
            Err(CgiError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let resolved = resolved("blog.test", "/");
        let headers = HeaderMap::new();
        let method = Method::GET;
        let request = CgiRequest {
            script: Path::new("/code/blog/public/index.php"),
            resolved: &resolved,
            method: &method,
            headers: &headers,
            remote_addr: "127.0.0.1:50000".parse().unwrap(),
            server_port: 8080,
            https: false,
        };

        let err = run_script("devhost-no-such-binary", &request, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CgiError::Spawn { .. }));
    }
}
