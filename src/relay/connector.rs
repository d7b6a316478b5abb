//! Upstream connectors.
//!
//! A [`Connector`] turns a [`Destination`] into a duplex byte channel. The
//! relay engine only sees [`UpstreamStream`], so tests can substitute
//! in-memory channels for real sockets.

use std::io;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::protocol::Destination;

/// Any bidirectional byte stream.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

pub type UpstreamStream = Box<dyn Duplex>;

/// Opens upstream channels.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, destination: &'a Destination) -> BoxFuture<'a, io::Result<UpstreamStream>>;
}

/// Plain TCP with a connect deadline.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, destination: &'a Destination) -> BoxFuture<'a, io::Result<UpstreamStream>> {
        Box::pin(async move {
            let addr = (destination.host.as_str(), destination.port);
            let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as UpstreamStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::Command;

    fn destination(host: &str, port: u16) -> Destination {
        Destination {
            host: host.to_string(),
            port,
            command: Command::Tcp,
        }
    }

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let connector = TcpConnector::new(Duration::from_secs(1));
        let mut stream = connector.connect(&destination("127.0.0.1", port)).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TcpConnector::new(Duration::from_secs(1));
        assert!(connector.connect(&destination("127.0.0.1", port)).await.is_err());
    }
}
