use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use splitstream::protocol::{HandshakeRequest, Secret};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Length of the reply preamble at the head of every downlink.
const PREAMBLE_LEN: usize = 2;

#[derive(Parser)]
#[command(name = "splitstream-cli")]
#[command(about = "Forward local TCP connections through a splitstream server", long_about = None)]
struct Cli {
    /// Server base URL.
    #[arg(short, long, default_value = "http://localhost:8080")]
    server: String,

    /// Tunnel path prefix on the server.
    #[arg(long, default_value = "/tunnel")]
    base_path: String,

    /// Shared secret in UUID form.
    #[arg(long)]
    secret: Secret,

    /// Local address to accept connections on.
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: SocketAddr,

    /// Destination as host:port.
    #[arg(short, long)]
    target: String,

    /// Largest chunk posted per request.
    #[arg(long, default_value_t = 16 * 1024)]
    chunk_bytes: usize,

    /// How long to wait for client bytes to glue onto the handshake.
    #[arg(long, default_value_t = 50)]
    first_read_ms: u64,
}

struct Tunnel {
    client: reqwest::Client,
    base_url: String,
    request: HandshakeRequest,
    chunk_bytes: usize,
    first_read: Duration,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (host, port) = parse_target(&cli.target)?;
    let tunnel = Arc::new(Tunnel {
        client: reqwest::Client::builder().no_proxy().build()?,
        base_url: format!(
            "{}{}",
            cli.server.trim_end_matches('/'),
            cli.base_path.trim_end_matches('/')
        ),
        request: HandshakeRequest::new(cli.secret, host, port)?,
        chunk_bytes: cli.chunk_bytes.max(1),
        first_read: Duration::from_millis(cli.first_read_ms),
    });

    let listener = TcpListener::bind(cli.listen).await?;
    tracing::info!(listen = %cli.listen, target = %cli.target, "Forwarding");

    loop {
        let (socket, peer) = listener.accept().await?;
        let tunnel = tunnel.clone();
        tokio::spawn(async move {
            let session_id = Uuid::new_v4().to_string();
            tracing::info!(%peer, %session_id, "Connection accepted");
            if let Err(e) = tunnel.forward(socket, &session_id).await {
                tracing::warn!(%peer, %session_id, error = %e, "Tunnel ended with error");
            }
        });
    }
}

impl Tunnel {
    async fn forward(&self, socket: TcpStream, session_id: &str) -> Result<(), BoxError> {
        socket.set_nodelay(true)?;
        let (mut local_rx, local_tx) = socket.into_split();

        // Bytes already waiting ride along with the handshake.
        let mut first = vec![0u8; self.chunk_bytes];
        let n = match tokio::time::timeout(self.first_read, local_rx.read(&mut first)).await {
            Ok(read) => read?,
            Err(_) => 0,
        };
        self.post(session_id, 0, self.request.encode(&first[..n])).await?;

        let downlink = self.downlink(session_id, local_tx);
        let uplink = self.uplink(session_id, local_rx);
        let (down, up) = tokio::join!(downlink, uplink);
        up.and(down)
    }

    async fn uplink(&self, session_id: &str, mut local: OwnedReadHalf) -> Result<(), BoxError> {
        let mut seq = 1u64;
        let mut buf = vec![0u8; self.chunk_bytes];
        loop {
            let n = local.read(&mut buf).await?;
            if n == 0 {
                tracing::debug!(%session_id, "Local side closed");
                return Ok(());
            }
            self.post(session_id, seq, Bytes::copy_from_slice(&buf[..n])).await?;
            seq += 1;
        }
    }

    async fn downlink(&self, session_id: &str, mut local: OwnedWriteHalf) -> Result<(), BoxError> {
        let mut response = self
            .client
            .get(format!("{}/{}", self.base_url, session_id))
            .send()
            .await?
            .error_for_status()?;

        let mut preamble_left = PREAMBLE_LEN;
        while let Some(chunk) = response.chunk().await? {
            let skip = preamble_left.min(chunk.len());
            preamble_left -= skip;
            if chunk.len() > skip {
                local.write_all(&chunk[skip..]).await?;
            }
        }
        local.shutdown().await?;
        Ok(())
    }

    async fn post(&self, session_id: &str, seq: u64, body: Bytes) -> Result<(), BoxError> {
        self.client
            .post(format!("{}/{}/{}", self.base_url, session_id, seq))
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn parse_target(target: &str) -> Result<(String, u16), BoxError> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("target {target:?} is not host:port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("target {target:?} has no host").into());
    }
    Ok((host.to_string(), port.parse()?))
}
