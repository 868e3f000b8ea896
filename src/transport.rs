//! Byte-stream transports to the broker: plain TCP or TLS over TCP.

use crate::error::{PublisherError, Result};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[serde(alias = "tcp")]
    Plain,
    #[serde(alias = "ssl", alias = "tls")]
    Encrypted,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Plain => "tcp",
            TransportKind::Encrypted => "ssl",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = PublisherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" | "plain" => Ok(TransportKind::Plain),
            "ssl" | "tls" | "encrypted" => Ok(TransportKind::Encrypted),
            other => Err(PublisherError::Transport(format!(
                "unknown transport scheme [{}]",
                other
            ))),
        }
    }
}

/// Any bidirectional byte stream a session can run over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Opens a transport of `kind` to `address` (`host:port`).
///
/// The TCP connect and the TLS handshake are each bounded by `connect_timeout`.
pub async fn dial(
    kind: TransportKind,
    address: &str,
    connect_timeout: Duration,
) -> Result<BoxedStream> {
    let tcp = timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| PublisherError::Timeout(connect_timeout.as_millis() as u64))?
        .map_err(|e| {
            PublisherError::Transport(format!("failed to connect to {}: {}", address, e))
        })?;
    tcp.set_nodelay(true)?;
    debug!(%address, transport = %kind, "transport connected");

    match kind {
        TransportKind::Plain => Ok(Box::new(tcp)),
        TransportKind::Encrypted => {
            let server_name = server_name(address)?;
            let tls = timeout(connect_timeout, tls_connector().connect(server_name, tcp))
                .await
                .map_err(|_| PublisherError::Timeout(connect_timeout.as_millis() as u64))?
                .map_err(|e| {
                    PublisherError::Transport(format!(
                        "TLS handshake with {} failed: {}",
                        address, e
                    ))
                })?;
            Ok(Box::new(tls))
        }
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

fn host_part(address: &str) -> &str {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

fn server_name(address: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host_part(address).to_string()).map_err(|e| {
        PublisherError::Transport(format!("invalid TLS server name in {}: {}", address, e))
    })
}
