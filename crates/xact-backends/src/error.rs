//! Error types for backend operations

use thiserror::Error;

/// Backend operation errors
#[derive(Error, Debug)]
pub enum BackendError {
	/// Every acquire attempt against the backend failed
	#[error("backend '{backend}' is unavailable after {attempts} attempts: {reason}")]
	Unavailable {
		backend: String,
		attempts: u32,
		reason: String,
	},

	/// Transport-level failure while establishing or validating a session
	#[error("connection error: {0}")]
	Connect(String),

	/// Statement execution failure, message taken verbatim from the driver
	#[error("query execution error: {0}")]
	Query(String),

	/// No backend registered under the requested id
	#[error("unknown backend '{0}'")]
	UnknownBackend(String),

	/// The pool has been shut down and no longer loans sessions
	#[error("pool for backend '{0}' is shut down")]
	PoolClosed(String),

	/// Result-shape mismatch when reading rows
	#[error("row decode error: {0}")]
	Decode(String),
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

impl From<sqlx::Error> for BackendError {
	fn from(err: sqlx::Error) -> Self {
		match err {
			sqlx::Error::Io(e) => BackendError::Connect(e.to_string()),
			sqlx::Error::Tls(e) => BackendError::Connect(e.to_string()),
			sqlx::Error::Configuration(e) => BackendError::Connect(e.to_string()),
			sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
				BackendError::Connect(err.to_string())
			}
			sqlx::Error::ColumnNotFound(c) => {
				BackendError::Decode(format!("column not found: {c}"))
			}
			sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
				BackendError::Decode(err.to_string())
			}
			other => BackendError::Query(other.to_string()),
		}
	}
}
