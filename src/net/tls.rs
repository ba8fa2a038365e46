//! TLS configuration and certificate loading.

use std::net::SocketAddr;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;
use crate::http::TlsListener;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {cert_path:?}"),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {key_path:?}"),
        ));
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// The HTTPS listener described by `config`.
pub async fn tls_listener(config: &TlsConfig) -> Result<TlsListener, std::io::Error> {
    let address: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let rustls = load_tls_config(Path::new(&config.cert_path), Path::new(&config.key_path)).await?;
    Ok(TlsListener {
        address,
        config: rustls,
    })
}
