//! Local development front-end: maps `<site>.<tld>` hosts onto project directories and
//! upstreams, picks a framework driver per project and serves each request.

// Core subsystems
pub mod dispatch;
pub mod drivers;
pub mod fs;
pub mod sites;

// Surfaces
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServerConfig;
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
