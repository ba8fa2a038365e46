use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use devhost::config::HomeConfig;
use devhost::drivers::{DriverRegistry, Site};
use devhost::fs::{FileSystem, RealFs};
use devhost::lifecycle;
use devhost::sites::BindingStore;

#[derive(Parser)]
#[command(name = "devhost-ctl")]
#[command(about = "Manage the sites served by devhost", long_about = None)]
struct Cli {
    /// Home directory (defaults to $DEVHOST_HOME, then the user config directory).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve every directory under PATH as <dir>.<tld>
    Park { path: Option<PathBuf> },
    /// Stop serving the directories under PATH
    Forget { path: Option<PathBuf> },
    /// List parked roots and the sites found under them
    Parked,
    /// Serve PATH (default: current directory) as NAME.<tld>
    Link {
        name: String,
        path: Option<PathBuf>,
    },
    /// Remove a link
    Unlink { name: String },
    /// List links
    Links,
    /// Forward NAME.<tld> to an upstream http:// URL
    Proxy {
        name: String,
        url: String,
        #[arg(long)]
        secure: bool,
    },
    /// Remove a proxy binding
    Unproxy { name: String },
    /// List proxy bindings
    Proxies,
    /// Pin a site to a runtime version
    Isolate { name: String, version: String },
    /// Unpin a site's runtime version
    Unisolate { name: String },
    /// Redirect a site to HTTPS
    Secure { name: String },
    /// Stop redirecting a site to HTTPS
    Unsecure { name: String },
    /// Turn directory listings on or off
    DirectoryListing { state: Switch },
    /// Set the fallback site for unresolved hosts
    #[command(name = "default")]
    DefaultSite {
        path: Option<PathBuf>,
        #[arg(long, conflicts_with = "path")]
        clear: bool,
    },
    /// Show or change the top-level domain
    Tld { tld: Option<String> },
    /// Show or change the loopback address
    Loopback { address: Option<String> },
    /// Show which driver serves PATH (default: current directory)
    Which { path: Option<PathBuf> },
    /// Show what a site name resolves to
    Resolve { name: String },
    /// Remove dead links and missing parked roots
    Prune,
}

fn current_dir_or(path: Option<PathBuf>) -> Result<PathBuf, std::io::Error> {
    match path {
        Some(path) => Ok(path),
        None => std::env::current_dir(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let home = HomeConfig { path: cli.home }
        .resolve()
        .ok_or("cannot determine a home directory; pass --home or set DEVHOST_HOME")?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFs::new());
    let store = BindingStore::new(fs.clone(), home);
    store.ensure_base()?;

    match cli.command {
        Commands::Park { path } => {
            let root = store.add_parked_root(&current_dir_or(path)?)?;
            println!("Parked {}", root.display());
        }
        Commands::Forget { path } => {
            let path = current_dir_or(path)?;
            if store.remove_parked_root(&path)? {
                println!("Forgot {}", path.display());
            } else {
                println!("{} was not parked", path.display());
            }
        }
        Commands::Parked => {
            let registry = store.read()?;
            for root in &registry.paths {
                println!("{}", root.display());
            }
            for site in store.parked_sites()? {
                println!("  {}.{} -> {}", site.name, registry.tld, site.path.display());
            }
        }
        Commands::Link { name, path } => {
            let link = store.add_link(&name, &current_dir_or(path)?)?;
            println!("Linked {}", link.display());
        }
        Commands::Unlink { name } => {
            if store.remove_link(&name)? {
                println!("Unlinked {name}");
            } else {
                println!("No link named {name}");
            }
        }
        Commands::Links => {
            let tld = store.read()?.tld;
            for link in store.links()? {
                let target = link
                    .target
                    .as_deref()
                    .map(|t| t.display().to_string())
                    .unwrap_or_else(|| "(missing)".to_string());
                let secure = if link.overrides.secure { " [secure]" } else { "" };
                println!("{}.{tld} -> {target}{secure}", link.name);
            }
        }
        Commands::Proxy { name, url, secure } => {
            let name = store.add_proxy(&name, &url, secure)?;
            println!("Proxying {name} to {url}");
        }
        Commands::Unproxy { name } => {
            if store.remove_proxy(&name)? {
                println!("Removed proxy {name}");
            } else {
                println!("No proxy named {name}");
            }
        }
        Commands::Proxies => {
            for (name, target) in store.proxies()? {
                let secure = if target.secure { " [secure]" } else { "" };
                println!("{name} -> {}{secure}", target.url);
            }
        }
        Commands::Isolate { name, version } => {
            let name = store.set_runtime(&name, Some(&version))?;
            println!("{name} now runs on {version}");
        }
        Commands::Unisolate { name } => {
            let name = store.set_runtime(&name, None)?;
            println!("{name} uses the default runtime");
        }
        Commands::Secure { name } => {
            let name = store.set_secure(&name, true)?;
            println!("{name} is redirected to HTTPS");
        }
        Commands::Unsecure { name } => {
            let name = store.set_secure(&name, false)?;
            println!("{name} is served over HTTP");
        }
        Commands::DirectoryListing { state } => {
            let enabled = matches!(state, Switch::On);
            store.set_directory_listing(enabled)?;
            println!("Directory listing {}", if enabled { "on" } else { "off" });
        }
        Commands::DefaultSite { path, clear } => {
            if clear {
                store.set_default_site(None)?;
                println!("Default site cleared");
            } else {
                let path = current_dir_or(path)?;
                store.set_default_site(Some(&path))?;
                println!("Default site is {}", path.display());
            }
        }
        Commands::Tld { tld } => match tld {
            Some(tld) => println!("TLD set to {}", store.set_tld(&tld)?),
            None => println!("{}", store.read()?.tld),
        },
        Commands::Loopback { address } => match address {
            Some(address) => {
                store.set_loopback(&address)?;
                println!("Loopback set to {}", store.read()?.loopback);
            }
            None => println!("{}", store.read()?.loopback),
        },
        Commands::Which { path } => {
            let path = fs.canonicalize(&current_dir_or(path)?)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let drivers = DriverRegistry::load(&*fs, &store.drivers_dir());
            which(&drivers, &*fs, &path, &name);
        }
        Commands::Resolve { name } => match store.resolve_site_path(&name.to_ascii_lowercase())? {
            Some(binding) => match binding.path() {
                Some(path) => println!("{} ({}) -> {}", binding.name(), binding.kind(), path.display()),
                None => println!("{} ({})", binding.name(), binding.kind()),
            },
            None => println!("{name} does not resolve"),
        },
        Commands::Prune => {
            let (_, report) = lifecycle::prepare(&store)?;
            for name in &report.pruned_links {
                println!("Removed dead link {name}");
            }
            for root in store.prune_parked_roots()? {
                println!("Forgot missing parked root {}", root.display());
            }
        }
    }

    Ok(())
}

fn which(drivers: &DriverRegistry, fs: &dyn FileSystem, path: &Path, name: &str) {
    let site = Site::new(fs, path, name);
    match drivers.select(&site, "/") {
        Some(driver) => println!("{} is served by {}", path.display(), driver.name()),
        None => println!("No driver serves {}", path.display()),
    }
}
