//! Typed settings for backends and the coordinator
//!
//! The variable names and defaults match the canonical two-backend
//! deployment: `db1` on 3306 and `db2` on 3307, five pooled sessions per
//! backend, a 60 s transaction deadline and a 30 s prepare deadline.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SettingsError};

/// Connection parameters and pool sizing for one backend.
///
/// Built once at registry construction and never mutated afterwards.
/// `Debug` and `Serialize` redact the password so settings can be logged
/// and exported on status surfaces.
#[derive(Clone, Serialize)]
pub struct BackendSettings {
	/// Stable backend identifier, e.g. `db1`
	pub id: String,
	pub host: String,
	pub port: u16,
	pub user: String,
	#[serde(skip_serializing)]
	pub password: String,
	pub database: String,
	/// Upper bound on live sessions in this backend's pool
	pub pool_size: usize,
	/// Budget for acquiring a session, including the initial connect
	pub connect_timeout: Duration,
}

impl BackendSettings {
	/// Read the settings for backend `index` from `DB<index>_*` variables.
	///
	/// Unset variables fall back to the development defaults. Backend 2
	/// defaults to port 3307 and schema `db2` so both backends can run on
	/// one host.
	///
	/// # Examples
	///
	/// ```
	/// use xact_conf::BackendSettings;
	///
	/// let db1 = BackendSettings::from_env(1).unwrap();
	/// assert_eq!(db1.id, "db1");
	/// ```
	pub fn from_env(index: u8) -> Result<Self> {
		let default_port = if index == 2 { 3307 } else { 3306 };
		Ok(Self {
			id: format!("db{index}"),
			host: var_or(&format!("DB{index}_HOST"), "localhost"),
			port: parsed_var(&format!("DB{index}_PORT"), default_port)?,
			user: var_or(&format!("DB{index}_USER"), "root"),
			password: var_or(&format!("DB{index}_PASSWORD"), "password"),
			database: var_or(&format!("DB{index}_DATABASE"), &format!("db{index}")),
			pool_size: parsed_var("CONNECTION_POOL_SIZE", 5)?,
			connect_timeout: Duration::from_secs(parsed_var("CONNECTION_TIMEOUT", 30)?),
		})
	}
}

impl fmt::Debug for BackendSettings {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BackendSettings")
			.field("id", &self.id)
			.field("host", &self.host)
			.field("port", &self.port)
			.field("user", &self.user)
			.field("password", &"<redacted>")
			.field("database", &self.database)
			.field("pool_size", &self.pool_size)
			.field("connect_timeout", &self.connect_timeout)
			.finish()
	}
}

/// Deadlines and retry policy for the transaction coordinator.
#[derive(Clone, Debug, Serialize)]
pub struct CoordinatorSettings {
	/// Global deadline measured from transaction construction
	pub transaction_timeout: Duration,
	/// Phase-local deadline measured from entry into the prepare phase
	pub prepare_timeout: Duration,
	/// Session-acquire attempts before a backend is reported unavailable
	pub max_retry_attempts: u32,
	/// Backoff seed between acquire attempts; doubles per attempt
	pub retry_interval: Duration,
}

impl CoordinatorSettings {
	pub fn from_env() -> Result<Self> {
		Ok(Self {
			transaction_timeout: Duration::from_secs(parsed_var("TRANSACTION_TIMEOUT", 60)?),
			prepare_timeout: Duration::from_secs(parsed_var("PREPARE_TIMEOUT", 30)?),
			max_retry_attempts: parsed_var("MAX_RETRY_ATTEMPTS", 3)?,
			retry_interval: Duration::from_secs(parsed_var("RETRY_INTERVAL", 1)?),
		})
	}
}

impl Default for CoordinatorSettings {
	fn default() -> Self {
		Self {
			transaction_timeout: Duration::from_secs(60),
			prepare_timeout: Duration::from_secs(30),
			max_retry_attempts: 3,
			retry_interval: Duration::from_secs(1),
		}
	}
}

/// Aggregate settings for the canonical two-backend deployment.
#[derive(Clone, Debug, Serialize)]
pub struct Settings {
	pub backends: Vec<BackendSettings>,
	pub coordinator: CoordinatorSettings,
}

impl Settings {
	/// Read the full configuration (`db1`, `db2`, coordinator policy) from
	/// the environment.
	pub fn from_env() -> Result<Self> {
		Ok(Self {
			backends: vec![BackendSettings::from_env(1)?, BackendSettings::from_env(2)?],
			coordinator: CoordinatorSettings::from_env()?,
		})
	}
}

fn var_or(key: &str, default: &str) -> String {
	env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T>
where
	T: FromStr,
	T::Err: fmt::Display,
{
	match env::var(key) {
		Ok(raw) => raw.parse().map_err(|e: T::Err| SettingsError::Invalid {
			key: key.to_string(),
			value: raw,
			reason: e.to_string(),
		}),
		Err(_) => Ok(default),
	}
}
