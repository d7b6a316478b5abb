//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging with session id and sequence fields
//! - Request ID flows through the HTTP layer
//! - Metrics are cheap (atomic increments)
//! - Secrets and payload bytes are never logged

pub mod logging;
pub mod metrics;
