//! Error types for settings construction

use thiserror::Error;

/// Settings construction errors
#[derive(Error, Debug)]
pub enum SettingsError {
	/// An environment variable was set but could not be parsed
	#[error("invalid value '{value}' for {key}: {reason}")]
	Invalid {
		key: String,
		value: String,
		reason: String,
	},
}

/// Result type for settings construction
pub type Result<T> = std::result::Result<T, SettingsError>;
