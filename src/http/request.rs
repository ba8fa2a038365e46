//! Request identification and inspection.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) unless the client sent one
//! - Echo the ID on the response and carry it to upstreams
//! - Extract the host a request was addressed to
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - An incoming `x-request-id` is kept, so chains of local services share one ID

use axum::http::{header, HeaderName, HeaderValue, Request};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Produces a fresh UUID for every request without an ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID.clone(), MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID.clone())
}

pub trait RequestIdExt {
    /// The request's ID, or `"unknown"` when it has none.
    fn request_id(&self) -> String;

    /// The host the request was addressed to: the `Host` header, else the URI authority.
    fn target_host(&self) -> Option<String>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> String {
        self.headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string()
    }

    fn target_host(&self) -> Option<String> {
        self.headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| self.uri().authority().map(|a| a.to_string()))
            .filter(|host| !host.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_uuids() {
        let request = Request::new(());
        let id = MakeRequestUuid.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }

    #[test]
    fn host_header_wins_over_authority() {
        let request = Request::builder()
            .uri("http://other.test/")
            .header(header::HOST, "blog.test:8080")
            .body(())
            .unwrap();
        assert_eq!(request.target_host().as_deref(), Some("blog.test:8080"));

        let absolute = Request::builder().uri("http://shop.test/cart").body(()).unwrap();
        assert_eq!(absolute.target_host().as_deref(), Some("shop.test"));

        let bare = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(bare.target_host(), None);
        assert_eq!(bare.request_id(), "unknown");
    }
}
