//! TLS stream setup.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::Config;
use crate::error::{Error, Result};

/// A TLS-encrypted IMAP stream.
pub type ImapStream = TlsStream<TcpStream>;

/// Connects to the configured server with implicit TLS.
///
/// The TCP connect and TLS handshake together are bounded by
/// `config.connect_timeout`.
///
/// # Errors
///
/// Returns an error on connect failure, handshake failure, or deadline
/// overrun.
pub async fn connect_tls(config: &Config) -> Result<ImapStream> {
    let addr = format!("{}:{}", config.host, config.port);
    let server_name = ServerName::try_from(config.host.clone())?;
    let connector = tls_connector();

    timeout(config.connect_timeout, async {
        let tcp = TcpStream::connect(&addr).await?;
        tcp.set_nodelay(true)?;
        let tls = connector.connect(server_name, tcp).await?;
        Ok(tls)
    })
    .await
    .map_err(|_| Error::Timeout(config.connect_timeout))?
}

/// A TLS connector over the webpki root store.
fn tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}
