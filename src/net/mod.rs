//! Socket abstraction over TCP, unix domain sockets and TLS wrapped streams.
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

mod tls;

pub use tls::{TlsConnector, TlsError, TlsMode, TlsStream};

pub(crate) use tls::{negotiate, sni_name};

/// A `TcpStream`, `UnixStream`, or TLS wrapped stream, which implement
/// `AsyncRead` and `AsyncWrite` transparently.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    Tls(Box<dyn TlsStream>),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = tokio::net::TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    #[cfg(unix)]
    pub async fn connect_unix(path: &str) -> io::Result<Socket> {
        let socket = tokio::net::UnixStream::connect(path).await?;
        Ok(Socket { kind: Kind::Unix(socket) })
    }

    /// Wrap an already established bidirectional stream.
    pub fn from_stream(stream: Box<dyn TlsStream>) -> Socket {
        Socket { kind: Kind::Tls(stream) }
    }

    /// Read once from the socket into the spare capacity of `buf`.
    ///
    /// The caller reserves capacity first; zero is only returned when the
    /// peer closed the connection.
    pub(crate) fn poll_read_buf(
        &mut self,
        buf: &mut BytesMut,
        cx: &mut Context,
    ) -> Poll<io::Result<usize>> {
        let mut dst = ReadBuf::uninit(buf.spare_capacity_mut());
        ready!(Pin::new(&mut *self).poll_read(cx, &mut dst))?;
        let n = dst.filled().len();

        // `ReadBuf` guarantees the first `n` spare bytes are initialized
        unsafe { buf.set_len(buf.len() + n) };

        Poll::Ready(Ok(n))
    }

    /// Write `buf` out completely, then flush the transport.
    ///
    /// The write buffer is a single contiguous region, so this is a plain
    /// advance loop; the trailing flush matters for the TLS variant.
    pub(crate) fn poll_write_buf(
        &mut self,
        buf: &mut BytesMut,
        cx: &mut Context,
    ) -> Poll<io::Result<()>> {
        while !buf.is_empty() {
            let n = ready!(Pin::new(&mut *self).poll_write(cx, &buf[..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            buf.advance(n);
        }

        Pin::new(self).poll_flush(cx)
    }
}

impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_read(cx, buf),
            Kind::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write(cx, buf),
            Kind::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_flush(cx),
            Kind::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_shutdown(cx),
            Kind::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match &self.kind {
            Kind::Tcp(t) => t.is_write_vectored(),
            #[cfg(unix)]
            Kind::Unix(u) => u.is_write_vectored(),
            Kind::Tls(s) => s.is_write_vectored(),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Tcp(tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(unix) => std::fmt::Debug::fmt(unix, f),
            Kind::Tls(_) => f.write_str("TlsStream"),
        }
    }
}
