//! Site bindings.
//!
//! # Data Flow
//! ```text
//! site name ("blog", "api.blog")
//!     → registry.rs (config.json: proxies, parked roots, overrides)
//!     → store.rs    (proxy? → link in Sites/? → first parked root holding it?)
//!     → SiteBinding::{Proxy, Link, Parked} or nothing
//!
//! administration (devhost-ctl):
//!     link / unlink / park / forget / proxy / isolate / secure
//!     → store.rs (read-modify-write, atomic replace)
//! ```
//!
//! # Design Decisions
//! - Precedence is fixed: proxy, then link, then parked roots in registry order
//! - Directory names match case-insensitively; a subdomain falls back to its last label
//! - Dead links are skipped during resolution and removed by `prune_dead_links`

pub mod binding;
pub mod registry;
pub mod store;

pub use binding::{Link, ParkedSite, SiteBinding};
pub use registry::{ProxyTarget, Registry, SiteOverrides, Toggle};
pub use store::{normalize_site_name, BindingStore, StoreError};
