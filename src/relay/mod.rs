//! Relay subsystem.
//!
//! # Data Flow
//! ```text
//! Handshake decoded
//!     → connector.rs (open duplex channel to host:port)
//!     → engine.rs (write leftover payload, spawn pumps)
//!         uplink pump:   sequencer queue → upstream write side
//!         downlink pump: upstream read side → downlink.rs → GET response body
//! ```
//!
//! # Design Decisions
//! - Two explicit pumps, each ending on its own; no fire-and-forget loops
//! - Connector is a trait so the engine runs against in-memory channels in tests
//! - Only real upstream bytes are relayed; failures close the session

pub mod connector;
pub mod downlink;
pub mod engine;

pub use connector::{Connector, TcpConnector, UpstreamStream};
pub use downlink::{DownlinkMux, DownlinkReceiver};
pub use engine::{RelayEngine, RelayHandle, RelaySettings, RelayStatus};
