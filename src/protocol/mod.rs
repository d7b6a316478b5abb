//! Tunnel wire protocol.
//!
//! # Data Flow
//! ```text
//! chunk 0 bytes
//!     → reader.rs (incremental exact-byte reads, truncation detection)
//!     → handshake.rs (secret check, command, port, address, leftover payload)
//!     → Handshake { version, destination, leftover }
//!     → session layer opens the relay
//! ```
//!
//! # Wire Format
//! ```text
//! [1:version][16:secret][1:E][E:extra][1:command][2:port][1:addrType][addr][payload...]
//! ```
//! Reply preamble sent at the head of the downlink: `[version, 0x00]`.
//!
//! # Design Decisions
//! - The decoder never reads past the bytes it needs for the current field
//! - Every failure is terminal for the attempt; nothing is retried
//! - Errors carry detail for logs only; the HTTP layer maps them to a generic 400

pub mod error;
pub mod handshake;
pub mod reader;

pub use error::HandshakeError;
pub use handshake::{constant_time_eq, Command, Destination, Handshake, HandshakeRequest, Secret};
pub use reader::BinaryReader;
