//! HTTP surface subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → dispatch::Dispatcher (site, driver, action)
//!     → static file      → response.rs (ServeFile)
//!     → front controller → cgi.rs (runtime binary over CGI/1.1)
//!     → proxy binding    → proxy.rs (upstream client)
//!     → listing / 404    → response.rs
//!     → Send to client
//! ```

pub mod cgi;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use cgi::CgiError;
pub use proxy::ProxyError;
pub use request::{MakeRequestUuid, RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer, TlsListener};
