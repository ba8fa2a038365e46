//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty for a terminal, JSON for log collectors)
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-request-id`) is attached to the request span and flows into every event
//! - Metrics are cheap (atomic increments) and no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
