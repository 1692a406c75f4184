//! Stream abstraction for TCP and TLS connections.
//!
//! The handshake starts on plain TCP and may switch to TLS before startup, so
//! the connection buffers one of these rather than a concrete socket type.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A Vertica connection stream (TCP or TLS).
pub enum VerticaStream {
    /// Plain TCP connection (unencrypted)
    Tcp(TcpStream),
    /// TLS-encrypted connection
    Tls(Box<TlsStream<TcpStream>>),
}

impl VerticaStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, VerticaStream::Tls(_))
    }
}

impl AsyncRead for VerticaStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            VerticaStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            VerticaStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for VerticaStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            VerticaStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            VerticaStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            VerticaStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            VerticaStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            VerticaStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            VerticaStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
