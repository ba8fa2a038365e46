//! devhost server
//!
//! ```text
//!     Client Request
//!     ──────────▶ http server ──▶ dispatcher ──▶ binding store ──▶ config.json, Sites/
//!                     │               │
//!                     │               └──────▶ driver registry ──▶ built-in + Drivers/*.toml
//!                     ▼
//!     ◀────────── static file │ front controller (CGI) │ upstream proxy │ listing │ 404
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::net::TcpListener;

use devhost::config::watcher::restart_required;
use devhost::config::{load_config, ConfigWatcher, ServerConfig};
use devhost::fs::RealFs;
use devhost::observability::{logging, metrics};
use devhost::sites::BindingStore;
use devhost::{lifecycle, net, Dispatcher, HttpServer};

#[derive(Parser)]
#[command(name = "devhost")]
#[command(about = "Serve local projects as <site>.<tld>", long_about = None)]
struct Cli {
    /// Server configuration file (TOML). Watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Home directory (registry, Sites/, Drivers/). Overrides the configuration.
    #[arg(long)]
    home: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(home) = cli.home {
        config.home.path = Some(home);
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "devhost starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let home = config
        .home
        .resolve()
        .ok_or("cannot determine a home directory; set home.path or DEVHOST_HOME")?;
    let store = BindingStore::new(Arc::new(RealFs::new()), home);
    let (drivers, report) = lifecycle::prepare(&store)?;

    tracing::info!(
        home = ?store.home(),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        drivers = drivers.len(),
        pruned_links = report.pruned_links.len(),
        "Configuration loaded"
    );

    let shared = Arc::new(ArcSwap::from_pointee(config.clone()));

    // The watcher stops when dropped; keep it for the life of the server.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let guard = watcher.run()?;
            let live = shared.clone();
            tokio::spawn(async move {
                while let Some(next) = updates.recv().await {
                    let pending = restart_required(&live.load(), &next);
                    if !pending.is_empty() {
                        tracing::warn!(fields = ?pending, "Configuration changes take effect after a restart");
                    }
                    live.store(Arc::new(next));
                    metrics::record_config_reload(true);
                    tracing::info!("Configuration reloaded");
                }
            });
            Some(guard)
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let tls = match &config.listener.tls {
        Some(tls) => Some(net::tls::tls_listener(tls).await?),
        None => None,
    };

    let dispatcher = Dispatcher::new(store, Arc::new(drivers));
    HttpServer::new(shared, dispatcher).run(listener, tls).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
