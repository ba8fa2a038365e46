//! Host header and request URI parsing.

use std::borrow::Cow;
use std::net::IpAddr;

use percent_encoding::percent_decode_str;

/// `host` without a trailing `:port`. Bracketed IPv6 literals keep their brackets.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Whether the host (port allowed) is an IPv4 or IPv6 literal.
pub fn is_ip_host(host: &str) -> bool {
    let host = strip_port(host.trim());
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.parse::<IpAddr>().is_ok()
}

/// Site name for a host header: no port, no `.tld` suffix, no leading `www.`, lowercase.
pub fn site_name_from_host(host: &str, tld: &str) -> String {
    let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
    let suffix = format!(".{}", tld.to_ascii_lowercase());
    let name = host.strip_suffix(&suffix).unwrap_or(&host);
    name.strip_prefix("www.").unwrap_or(name).to_string()
}

/// The path of a request URI: query and fragment removed, percent-decoded, dot segments
/// and repeated slashes resolved. Always starts with `/`; a trailing slash is kept.
pub fn normalize_uri(request_uri: &str) -> String {
    let path = request_uri
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let decoded: Cow<'_, str> = percent_decode_str(path).decode_utf8_lossy();

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut uri = format!("/{}", segments.join("/"));
    let trailing = decoded.ends_with('/') || decoded.ends_with("/.") || decoded.ends_with("/..");
    if trailing && uri.len() > 1 {
        uri.push('/');
    }
    uri
}

/// Query string of a request URI (without `?`), empty if there is none.
pub fn query_of(request_uri: &str) -> &str {
    let without_fragment = request_uri.split('#').next().unwrap_or_default();
    without_fragment
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or_default()
}

/// Split `/<segment>/<rest>` into the first path segment and the remaining request URI
/// (query string preserved, at least `/`).
pub fn split_first_segment(request_uri: &str) -> Option<(&str, String)> {
    let trimmed = request_uri.trim_start_matches('/');
    let end = trimmed.find(['/', '?', '#']).unwrap_or(trimmed.len());
    let (segment, rest) = trimmed.split_at(end);
    if segment.is_empty() {
        return None;
    }
    let rest = if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    };
    Some((segment, rest))
}

/// Whether `uri` names a PHP script.
pub fn is_php(uri: &str) -> bool {
    std::path::Path::new(uri)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("php"))
}
