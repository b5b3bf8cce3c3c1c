//! Socket setup: TCP, optional TLS, and the futures-io bridge async-imap expects.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::io::{AsyncRead, AsyncWrite};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::constants::CONNECT_TIMEOUT_SECS;
use crate::error::SyncError;

/// Plain or TLS connection, wrapped for futures-io.
#[derive(Debug)]
pub enum MailStream {
    Plain(Compat<TcpStream>),
    Tls(Box<Compat<TlsStream<TcpStream>>>),
}

fn tls_connector() -> Result<TlsConnector, SyncError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SyncError::Protocol(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Open a connection to `host:port`, bounded by the connect timeout.
pub async fn open(host: &str, port: u16, use_tls: bool) -> Result<MailStream, SyncError> {
    let limit = Duration::from_secs(CONNECT_TIMEOUT_SECS);
    let addr = format!("{}:{}", host, port);

    let tcp = tokio::time::timeout(limit, TcpStream::connect(&addr))
        .await
        .map_err(|_| SyncError::Network(format!("timed out connecting to {}", addr)))?
        .map_err(|e| SyncError::Network(format!("failed to connect to {}: {}", addr, e)))?;

    if !use_tls {
        tracing::warn!("Connecting to {} without TLS", addr);
        return Ok(MailStream::Plain(tcp.compat()));
    }

    let name = ServerName::try_from(host.to_string())
        .map_err(|e| SyncError::Protocol(format!("invalid server name {}: {}", host, e)))?;
    let tls = tokio::time::timeout(limit, tls_connector()?.connect(name, tcp))
        .await
        .map_err(|_| SyncError::Network(format!("TLS handshake with {} timed out", addr)))?
        .map_err(|e| SyncError::Network(format!("TLS handshake with {} failed: {}", addr, e)))?;

    Ok(MailStream::Tls(Box::new(tls.compat())))
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_close(cx),
            MailStream::Tls(s) => Pin::new(s.as_mut()).poll_close(cx),
        }
    }
}
