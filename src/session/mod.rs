//! Credential and session lifecycle core.
//!
//! The engine in [`engine`] orchestrates four narrow collaborators, each
//! behind a trait so storage backends swap cleanly between Postgres/Redis in
//! production and in-memory implementations in tests:
//!
//! - [`credential`]: read-only credential lookup plus bounded Argon2
//!   verification.
//! - [`ledger`]: durable session rows and refresh-chain lineage with
//!   compare-and-advance sequence numbers.
//! - [`revocation`]: self-expiring blocklist of revoked session/chain ids.
//! - [`events`]: best-effort lifecycle notifications on the bus.

pub mod clock;
pub mod credential;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod revocation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, SessionEngine, SessionRef, TokenPair};
pub use error::{AuthError, SecurityAlertKind};
