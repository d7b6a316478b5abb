//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! POST chunk (id, seq)
//!     → store.rs (find or create session)
//!     → session.rs (sequencer: duplicate / gap / accept)
//!     → chunk 0: handshake decode, relay open
//!     → chunk n: queue upstream
//!
//! GET (id)
//!     → store.rs (find session)
//!     → session.rs (attach downlink sink)
//!
//! sweeper.rs
//!     → every interval: evict idle, never-established, and finished sessions
//! ```
//!
//! # Design Decisions
//! - A session is created only by chunk 0
//! - Activity is tracked outside the lock (activity.rs) so the pumps can
//!   refresh it without contending with requests

pub mod activity;
#[allow(clippy::module_inception)]
pub mod session;
pub mod store;
pub mod sweeper;

pub use activity::ActivityClock;
pub use session::{Admission, CloseReason, Session, SessionSnapshot, Timeouts};
pub use store::{SessionStore, StoreSettings};
pub use sweeper::Sweeper;
