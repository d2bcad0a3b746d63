//! # xact-backends
//!
//! The layer below the transaction coordinator: sessions, pools and the
//! backend registry for MySQL-compatible XA backends.
//!
//! - [`Session`]: object-safe handle to one live connection, able to run
//!   parameterized SQL and the raw XA verbs
//! - [`ConnectionPool`]: bounded pool per backend with probe caching and
//!   retry/backoff on acquire
//! - [`BackendRegistry`]: ordered, named collection of pools; one-shot
//!   query helper; health status; prepared-branch recovery tooling
//!
//! Sessions are loaned, never shared: a transaction owns its sessions
//! exclusively until it releases them at terminal state.

pub mod error;
pub mod pool;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod value;

pub use error::{BackendError, Result};
pub use pool::{ConnectionPool, MySqlSession, PoolConfig};
pub use recovery::XaBranch;
pub use registry::{BackendRegistry, BackendStatus};
pub use session::{escape_branch_id, Session};
pub use value::{QueryValue, Row};
