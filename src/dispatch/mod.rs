//! Request dispatch.
//!
//! # Data Flow
//! ```text
//! Host header + Request-URI
//!     → host.rs        (port/TLD/www stripping, IP-literal recovery, URI normalization)
//!     → BindingStore   (proxy? link? parked? default site?)
//!     → DriverRegistry (first driver that serves the canonical site path)
//!     → driver.mutate_uri
//!     → static file? → before_dispatch → front controller? → listing? → 404
//!     → ResolvedRequest { action }
//! ```
//!
//! # Design Decisions
//! - Pure with respect to the request: the same inputs and filesystem give the same action
//! - No state survives between requests; the registry is re-read each time
//! - "Not found" is an action, not an error

pub mod action;
pub mod dispatcher;
pub mod host;

pub use action::{Action, ResolvedRequest};
pub use dispatcher::{DispatchError, Dispatcher};
