//! # xact-conf
//!
//! Environment-derived configuration for the xact transaction coordinator.
//!
//! Settings come from process environment variables with conservative
//! defaults, so a two-backend development deployment works out of the box:
//!
//! - `DB<i>_HOST`, `DB<i>_PORT`, `DB<i>_USER`, `DB<i>_PASSWORD`,
//!   `DB<i>_DATABASE` for each backend `i`
//! - `CONNECTION_POOL_SIZE`, `CONNECTION_TIMEOUT` for session pooling
//! - `TRANSACTION_TIMEOUT`, `PREPARE_TIMEOUT`, `MAX_RETRY_ATTEMPTS`,
//!   `RETRY_INTERVAL` for the coordinator
//!
//! All structs are plain values: build them once at startup and hand them to
//! the registry. Nothing in this crate reads the environment after
//! construction.

pub mod error;
pub mod settings;

pub use error::{Result, SettingsError};
pub use settings::{BackendSettings, CoordinatorSettings, Settings};
