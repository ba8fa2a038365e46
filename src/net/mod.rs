//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → plain listener (tokio TcpListener, axum::serve)
//!     → tls.rs (optional TLS listener via axum-server + rustls)
//!     → Hand off to HTTP layer
//! ```

pub mod tls;
