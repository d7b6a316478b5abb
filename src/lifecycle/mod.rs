//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Ctrl+C (main.rs)
//!     → Shutdown::trigger
//!     → HTTP server stops accepting, sweeper exits
//!     → all sessions closed
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
