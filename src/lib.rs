//! HTTP-split TCP tunnel.
//!
//! A client carries one TCP stream over two kinds of HTTP request: numbered
//! `POST` chunks for the uplink and a long-lived streamed `GET` for the
//! downlink. The server reassembles the uplink, authenticates the handshake
//! in chunk 0, dials the destination and relays bytes both ways.

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod relay;
pub mod session;

pub use config::schema::TunnelConfig;
pub use error::{TunnelError, TunnelResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
