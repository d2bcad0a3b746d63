//! # xact-test
//!
//! Test support for the xact workspace:
//!
//! - [`ScriptedSession`] / [`SessionJournal`]: in-memory sessions that
//!   record the exact statements a transaction issues, inject failures and
//!   answer with canned rows; the protocol suites run on these with no
//!   database required
//! - [`containers`]: Docker-backed MySQL instances for the integration
//!   suites

pub mod containers;
pub mod session;

pub use containers::{mysql_backend, MySqlBackend};
pub use session::{JournalEntry, ScriptedSession, SessionJournal};
