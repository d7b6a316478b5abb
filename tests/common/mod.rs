//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use splitstream::config::TunnelConfig;
use splitstream::protocol::{Destination, HandshakeRequest, Secret};
use splitstream::relay::{Connector, UpstreamStream};
use splitstream::session::SessionStore;
use splitstream::{HttpServer, Shutdown};

pub const SECRET: &str = "10213243-5465-7687-98a9-bacbdcedfe0f";
pub const ADMIN_KEY: &str = "test-admin-key";

pub fn secret() -> Secret {
    SECRET.parse().unwrap()
}

pub fn handshake(host: &str, port: u16, payload: &[u8]) -> bytes::Bytes {
    HandshakeRequest::new(secret(), host, port)
        .unwrap()
        .encode(payload)
}

pub fn test_config() -> TunnelConfig {
    let mut config = TunnelConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.tunnel.secret = SECRET.to_string();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// A mock destination: sends `greeting` on accept, then echoes and
/// reports every read.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub received: mpsc::UnboundedReceiver<Vec<u8>>,
}

pub async fn start_mock_upstream(greeting: &'static [u8]) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, received) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                if socket.write_all(greeting).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let _ = tx.send(buf[..n].to_vec());
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    MockUpstream { addr, received }
}

/// Sends every destination to one local address and remembers what was asked.
pub struct RedirectConnector {
    target: SocketAddr,
    pub seen: Mutex<Vec<Destination>>,
}

impl RedirectConnector {
    pub fn new(target: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            target,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Connector for RedirectConnector {
    fn connect<'a>(&'a self, destination: &'a Destination) -> BoxFuture<'a, io::Result<UpstreamStream>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push(destination.clone());
            let stream = TcpStream::connect(self.target).await?;
            Ok(Box::new(stream) as UpstreamStream)
        })
    }
}

/// Refuses every destination.
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect<'a>(&'a self, _: &'a Destination) -> BoxFuture<'a, io::Result<UpstreamStream>> {
        Box::pin(async { Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")) })
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<SessionStore>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_server(config: TunnelConfig, connector: Arc<dyn Connector>) -> TestServer {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::with_connector(config, connector).unwrap();
    let store = server.store();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    let handle = tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        store,
        shutdown,
        handle,
    }
}

/// Read from a streamed response until at least `n` bytes have arrived.
pub async fn read_at_least(response: &mut reqwest::Response, n: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < n {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("downlink stalled")
            .unwrap()
            .expect("downlink ended early");
        out.extend_from_slice(&chunk);
    }
    out
}
