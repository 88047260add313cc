//! The TLS boundary.
//!
//! The crate does not link a TLS implementation. A [`TlsConnector`] wraps a
//! user supplied upgrade function which receives the plain [`Socket`] after
//! the server accepted the `SSLRequest`, performs the handshake, and returns
//! the encrypted stream.
use std::{future::Future, io, pin::Pin, sync::Arc};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Socket;
use crate::Result;

/// A bidirectional byte stream usable as a connection transport.
pub trait TlsStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin { }

impl<T> TlsStream for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin { }

type UpgradeFuture = Pin<Box<dyn Future<Output = io::Result<Box<dyn TlsStream>>> + Send>>;

type UpgradeFn = dyn Fn(Socket, Option<String>) -> UpgradeFuture + Send + Sync;

/// Performs the TLS handshake over an accepted `SSLRequest`.
///
/// The upgrade function receives the plain socket and the SNI server name,
/// if any. IP literal hosts get `None` automatically.
pub struct TlsConnector {
    upgrade: Arc<UpgradeFn>,
}

impl TlsConnector {
    pub fn new<F, Fut, S>(upgrade: F) -> Self
    where
        F: Fn(Socket, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<S>> + Send + 'static,
        S: TlsStream + 'static,
    {
        Self {
            upgrade: Arc::new(move |socket, name| {
                let fut = upgrade(socket, name);
                Box::pin(async move { Ok(Box::new(fut.await?) as Box<dyn TlsStream>) })
            }),
        }
    }

    fn upgrade(&self, socket: Socket, server_name: Option<String>) -> UpgradeFuture {
        (self.upgrade)(socket, server_name)
    }
}

impl Clone for TlsConnector {
    fn clone(&self) -> Self {
        Self { upgrade: Arc::clone(&self.upgrade) }
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TlsConnector")
    }
}

/// Whether and how the connection is encrypted.
#[derive(Clone, Debug, Default)]
pub enum TlsMode {
    /// Never send an `SSLRequest`.
    #[default]
    Disable,
    /// Request TLS, fall back to plaintext if the server declines.
    Prefer(TlsConnector),
    /// Request TLS, fail the connection if the server declines.
    Require(TlsConnector),
}

/// An error during TLS negotiation.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("server does not support TLS")]
    Unsupported,
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(io::Error),
    #[error("received unencrypted data after SSL request")]
    UnencryptedData,
    #[error("unexpected SSL negotiation reply `{0}`")]
    UnexpectedReply(u8),
}

// Int32(80877103): The SSL request code.
const SSL_REQUEST: &[u8] = &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];

/// Perform the SSL negotiation that precedes the startup message.
///
/// On `'S'` the socket is handed to the connector; any bytes the server sent
/// after the reply byte before the handshake are a protocol violation.
pub(crate) async fn negotiate(
    mut socket: Socket,
    mode: &TlsMode,
    server_name: Option<String>,
) -> Result<Socket> {
    let connector = match mode {
        TlsMode::Disable => return Ok(socket),
        TlsMode::Prefer(connector) => connector,
        TlsMode::Require(connector) => connector,
    };

    socket.write_all(SSL_REQUEST).await?;
    socket.flush().await?;

    let mut buf = [0u8; 16];
    let n = socket.read(&mut buf).await?;
    if n == 0 {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }

    match buf[0] {
        b'S' => {
            if n > 1 {
                return Err(TlsError::UnencryptedData.into());
            }
            let stream = connector
                .upgrade(socket, server_name)
                .await
                .map_err(TlsError::HandshakeFailed)?;
            Ok(Socket::from_stream(stream))
        }
        b'N' => match mode {
            TlsMode::Prefer(_) => Ok(socket),
            _ => Err(TlsError::Unsupported.into()),
        },
        reply => Err(TlsError::UnexpectedReply(reply).into()),
    }
}

/// The SNI name for `host`, unless `host` is an IP literal.
pub(crate) fn sni_name(host: &str, configured: Option<&str>) -> Option<String> {
    match configured {
        Some(name) => Some(name.to_string()),
        None if host.parse::<std::net::IpAddr>().is_ok() => None,
        None => Some(host.to_string()),
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn ip_literal_disables_sni() {
        assert_eq!(sni_name("127.0.0.1", None), None);
        assert_eq!(sni_name("::1", None), None);
        assert_eq!(sni_name("db.example.com", None), Some("db.example.com".into()));
        assert_eq!(sni_name("127.0.0.1", Some("pin.example.com")), Some("pin.example.com".into()));
    }

    fn passthrough() -> TlsConnector {
        TlsConnector::new(|socket, _name| async move { Ok::<_, io::Error>(socket) })
    }

    #[tokio::test]
    async fn disable_sends_nothing() {
        let (client, mut server) = duplex(256);
        let socket = negotiate(Socket::from_stream(Box::new(client)), &TlsMode::Disable, None)
            .await
            .unwrap();

        // the channel stays silent
        drop(socket);
        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn require_fails_when_server_declines() {
        let (client, mut server) = duplex(256);
        server.write_all(b"N").await.unwrap();

        let err = negotiate(
            Socket::from_stream(Box::new(client)),
            &TlsMode::Require(passthrough()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Tls(TlsError::Unsupported)));

        // only the SSLRequest went out, never a startup message
        let mut sent = [0u8; 32];
        let n = server.read(&mut sent).await.unwrap();
        assert_eq!(&sent[..n], SSL_REQUEST);
        assert_eq!(server.read(&mut sent).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prefer_falls_back_to_plaintext() {
        let (client, mut server) = duplex(256);
        server.write_all(b"N").await.unwrap();

        negotiate(
            Socket::from_stream(Box::new(client)),
            &TlsMode::Prefer(passthrough()),
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn bytes_after_accept_are_rejected() {
        let (client, mut server) = duplex(256);
        // a man in the middle smuggling data behind the reply byte
        server.write_all(b"Sinjected").await.unwrap();

        let err = negotiate(
            Socket::from_stream(Box::new(client)),
            &TlsMode::Require(passthrough()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Tls(TlsError::UnencryptedData)));
    }

    #[tokio::test]
    async fn unknown_reply_byte() {
        let (client, mut server) = duplex(256);
        server.write_all(b"?").await.unwrap();

        let err = negotiate(
            Socket::from_stream(Box::new(client)),
            &TlsMode::Prefer(passthrough()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Tls(TlsError::UnexpectedReply(b'?'))));
    }
}
