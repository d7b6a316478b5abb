//! Handshake decoding and encoding.
//!
//! # Responsibilities
//! - Authenticate the client by its 16-byte secret
//! - Decode command, port and destination address
//! - Split the header from any tunnelled bytes glued onto it
//! - Build the reply preamble
//!
//! # Design Decisions
//! - The secret is compared before any further byte is read
//! - IPv6 addresses are rendered as eight full hex groups, no zero-compression
//! - Bytes beyond the header are returned as the leftover payload, never dropped

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::protocol::error::HandshakeError;
use crate::protocol::reader::BinaryReader;

/// Length of the client secret.
pub const SECRET_LEN: usize = 16;

/// version + secret + extra-length byte.
const PREFIX_LEN: usize = 1 + SECRET_LEN + 1;

const CMD_TCP: u8 = 0x01;

const ADDR_IPV4: u8 = 0x01;
const ADDR_DOMAIN: u8 = 0x02;
const ADDR_IPV6: u8 = 0x03;

/// Domain names carry a one-byte length.
const MAX_DOMAIN_LEN: usize = u8::MAX as usize;

/// The shared secret identifying a client.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    /// Compare without short-circuiting on the first differing byte.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        constant_time_eq(&self.0, candidate)
    }
}

/// Byte comparison whose running time depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Secrets are written in UUID text form.
impl FromStr for Secret {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(*uuid::Uuid::parse_str(s)?.as_bytes()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// The single supported command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Open a TCP stream to the destination.
    Tcp,
}

impl TryFrom<u8> for Command {
    type Error = HandshakeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            CMD_TCP => Ok(Command::Tcp),
            other => Err(HandshakeError::UnsupportedCommand(other)),
        }
    }
}

/// Where the tunnelled stream should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub command: Command,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A decoded handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub version: u8,
    pub destination: Destination,
    /// Tunnelled bytes that followed the header in the same chunk.
    pub leftover: Bytes,
}

impl Handshake {
    /// Decode a header from `reader`.
    ///
    /// On success the reader has consumed exactly the header; anything the
    /// reader already buffered past it is returned as `leftover`.
    pub async fn decode<R: AsyncRead + Unpin>(
        reader: &mut BinaryReader<R>,
        secret: &Secret,
    ) -> Result<Self, HandshakeError> {
        let prefix = reader.read_at_least(PREFIX_LEN).await?;
        if !secret.matches(&prefix[1..1 + SECRET_LEN]) {
            return Err(HandshakeError::AuthenticationFailed);
        }
        let version = prefix[0];
        let extra_len = prefix[PREFIX_LEN - 1] as usize;

        let addr_type_at = PREFIX_LEN + extra_len + 1 + 2;
        let buf = reader.read_at_least(addr_type_at + 2).await?;

        let command = Command::try_from(buf[PREFIX_LEN + extra_len])?;
        let port = u16::from_be_bytes([buf[addr_type_at - 2], buf[addr_type_at - 1]]);
        let addr_type = buf[addr_type_at];
        let addr_at = addr_type_at + 1;
        let domain_len = buf[addr_at] as usize;

        let (host, header_len) = match addr_type {
            ADDR_IPV4 => {
                let buf = reader.read_at_least(addr_at + 4).await?;
                let octets = &buf[addr_at..addr_at + 4];
                let host = format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]);
                (host, addr_at + 4)
            }
            ADDR_DOMAIN => {
                let start = addr_at + 1;
                let buf = reader.read_at_least(start + domain_len).await?;
                let host = std::str::from_utf8(&buf[start..start + domain_len])
                    .map_err(|_| HandshakeError::InvalidHostname)?;
                if host.is_empty() {
                    return Err(HandshakeError::InvalidHostname);
                }
                (host.to_string(), start + domain_len)
            }
            ADDR_IPV6 => {
                let buf = reader.read_at_least(addr_at + 16).await?;
                let groups: Vec<String> = buf[addr_at..addr_at + 16]
                    .chunks_exact(2)
                    .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                    .collect();
                (groups.join(":"), addr_at + 16)
            }
            other => return Err(HandshakeError::InvalidAddressType(other)),
        };

        let leftover = Bytes::copy_from_slice(&reader.buffered()[header_len..]);

        Ok(Self {
            version,
            destination: Destination { host, port, command },
            leftover,
        })
    }

    /// Decode a handshake that must fit entirely inside `chunk`.
    ///
    /// Everything after the header is the leftover payload.
    pub async fn from_chunk(chunk: &Bytes, secret: &Secret) -> Result<Self, HandshakeError> {
        let mut reader = BinaryReader::new(&chunk[..]);
        let mut handshake = Self::decode(&mut reader, secret).await?;
        let header_len = reader.consumed() - handshake.leftover.len();
        handshake.leftover = chunk.slice(header_len..);
        Ok(handshake)
    }

    /// The two bytes that open the downlink stream.
    pub fn reply_preamble(&self) -> [u8; 2] {
        [self.version, 0x00]
    }
}

/// Client-side description of a handshake to send.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub version: u8,
    pub secret: Secret,
    pub host: String,
    pub port: u16,
}

impl HandshakeRequest {
    /// Fails with `InvalidHostname` when a non-IP host is empty or does
    /// not fit the one-byte length field.
    pub fn new(secret: Secret, host: impl Into<String>, port: u16) -> Result<Self, HandshakeError> {
        let host = host.into();
        let is_ip = host.parse::<std::net::IpAddr>().is_ok();
        if !is_ip && (host.is_empty() || host.len() > MAX_DOMAIN_LEN) {
            return Err(HandshakeError::InvalidHostname);
        }
        Ok(Self {
            version: 0,
            secret,
            host,
            port,
        })
    }

    /// Encode the header followed by `payload`.
    ///
    /// IP literals are sent with their binary address types; anything else
    /// is sent as a domain.
    pub fn encode(&self, payload: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(64 + payload.len());
        out.put_u8(self.version);
        out.put_slice(self.secret.as_bytes());
        out.put_u8(0);
        out.put_u8(CMD_TCP);
        out.put_u16(self.port);
        match self.host.parse::<std::net::IpAddr>() {
            Ok(std::net::IpAddr::V4(ip)) => {
                out.put_u8(ADDR_IPV4);
                out.put_slice(&ip.octets());
            }
            Ok(std::net::IpAddr::V6(ip)) => {
                out.put_u8(ADDR_IPV6);
                out.put_slice(&ip.octets());
            }
            Err(_) => {
                out.put_u8(ADDR_DOMAIN);
                out.put_u8(self.host.len() as u8);
                out.put_slice(self.host.as_bytes());
            }
        }
        out.put_slice(payload);
        out.freeze()
    }
}
