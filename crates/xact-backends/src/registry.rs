//! Named collection of backends and their pools
//!
//! The registry is an explicitly constructed value: build it from settings
//! at startup, thread it through callers, and shut it down on exit. Backend
//! iteration order is registration order, which is also the participant
//! order transactions derive their branch ids from.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

use xact_conf::Settings;

use crate::error::{BackendError, Result};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::recovery::XaBranch;
use crate::session::{escape_branch_id, Session};
use crate::value::{QueryValue, Row};

/// Point-in-time health and identity of one backend.
#[derive(Clone, Debug, Serialize)]
pub struct BackendStatus {
	pub available: bool,
	pub last_probe: Option<DateTime<Utc>>,
	pub host: String,
	pub port: u16,
	pub database: String,
}

/// Ordered catalogue of backends, one pool each.
pub struct BackendRegistry {
	pools: IndexMap<String, Arc<ConnectionPool>>,
}

impl BackendRegistry {
	pub fn new() -> Self {
		Self {
			pools: IndexMap::new(),
		}
	}

	/// Build a registry with one pool per configured backend.
	///
	/// Pools are lazy: no connection is dialed until the first acquire or
	/// probe.
	///
	/// # Examples
	///
	/// ```no_run
	/// use xact_backends::BackendRegistry;
	/// use xact_conf::Settings;
	///
	/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
	/// let settings = Settings::from_env()?;
	/// let registry = BackendRegistry::from_settings(&settings);
	/// assert_eq!(registry.backend_ids(), vec!["db1", "db2"]);
	/// # Ok(())
	/// # }
	/// ```
	pub fn from_settings(settings: &Settings) -> Self {
		let mut registry = Self::new();
		for backend in &settings.backends {
			let config = PoolConfig::from_settings(backend, &settings.coordinator);
			registry.register(ConnectionPool::new(backend.clone(), config));
		}
		registry
	}

	/// Add a pool. Replaces any pool previously registered under the same
	/// backend id.
	pub fn register(&mut self, pool: ConnectionPool) {
		self.pools
			.insert(pool.backend_id().to_string(), Arc::new(pool));
	}

	pub fn len(&self) -> usize {
		self.pools.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pools.is_empty()
	}

	/// Backend ids in registration order.
	pub fn backend_ids(&self) -> Vec<&str> {
		self.pools.keys().map(String::as_str).collect()
	}

	pub fn pool(&self, backend_id: &str) -> Result<&Arc<ConnectionPool>> {
		self.pools
			.get(backend_id)
			.ok_or_else(|| BackendError::UnknownBackend(backend_id.to_string()))
	}

	/// Loan a session from the named backend.
	pub async fn acquire(&self, backend_id: &str) -> Result<Box<dyn Session>> {
		let session = self.pool(backend_id)?.acquire().await?;
		Ok(Box::new(session))
	}

	/// Loan one session per backend, in registration order.
	///
	/// All-or-nothing: when any backend fails, every session already
	/// acquired is returned to its pool before the error surfaces.
	pub async fn acquire_all(&self) -> Result<Vec<Box<dyn Session>>> {
		let mut sessions: Vec<Box<dyn Session>> = Vec::with_capacity(self.pools.len());
		for (backend_id, pool) in &self.pools {
			match pool.acquire().await {
				Ok(session) => sessions.push(Box::new(session)),
				Err(err) => {
					tracing::error!(
						backend = %backend_id,
						error = %err,
						"acquire_all failed; returning already-acquired sessions"
					);
					for session in sessions {
						session.release(true).await;
					}
					return Err(err);
				}
			}
		}
		Ok(sessions)
	}

	/// One-shot query helper: acquire, run, release.
	///
	/// Not suitable for multi-statement transactions; each call may run on
	/// a different connection.
	pub async fn query(
		&self,
		backend_id: &str,
		sql: &str,
		params: &[QueryValue],
	) -> Result<Vec<Row>> {
		let mut session = self.acquire(backend_id).await?;
		let result = session.fetch_all(sql, params).await;
		session.release(result.is_ok()).await;
		result
	}

	/// Probe every backend and report availability, ordered like
	/// [`backend_ids`](Self::backend_ids).
	pub async fn status(&self) -> IndexMap<String, BackendStatus> {
		let mut status = IndexMap::with_capacity(self.pools.len());
		for (backend_id, pool) in &self.pools {
			let available = pool.probe().await;
			let settings = pool.settings();
			status.insert(
				backend_id.clone(),
				BackendStatus {
					available,
					last_probe: pool.last_probe(),
					host: settings.host.clone(),
					port: settings.port,
					database: settings.database.clone(),
				},
			);
		}
		status
	}

	/// Ids of the backends whose probe currently passes.
	pub async fn available_backends(&self) -> Vec<String> {
		let mut available = Vec::new();
		for (backend_id, pool) in &self.pools {
			if pool.probe().await {
				available.push(backend_id.clone());
			}
		}
		available
	}

	/// List XA branches sitting in prepared state on the named backend.
	///
	/// Operator tooling for branches orphaned by commit-phase failures;
	/// pair with [`commit_branch`](Self::commit_branch) or
	/// [`rollback_branch`](Self::rollback_branch) to finish them.
	pub async fn recover(&self, backend_id: &str) -> Result<Vec<XaBranch>> {
		let mut session = self.pool(backend_id)?.acquire().await?;
		let result = session.raw_fetch("XA RECOVER").await;
		let ok = result.is_ok();
		let branches = result.and_then(|rows| {
			rows.iter().map(XaBranch::from_recover_row).collect::<Result<Vec<_>>>()
		});
		Box::new(session).release(ok).await;
		branches
	}

	/// Commit a prepared branch by id on a fresh session.
	pub async fn commit_branch(&self, backend_id: &str, branch_id: &str) -> Result<()> {
		self.finish_branch(backend_id, branch_id, "XA COMMIT").await
	}

	/// Roll back a prepared branch by id on a fresh session.
	pub async fn rollback_branch(&self, backend_id: &str, branch_id: &str) -> Result<()> {
		self.finish_branch(backend_id, branch_id, "XA ROLLBACK").await
	}

	async fn finish_branch(&self, backend_id: &str, branch_id: &str, verb: &str) -> Result<()> {
		let mut session = self.acquire(backend_id).await?;
		let sql = format!("{verb} '{}'", escape_branch_id(branch_id));
		let result = session.raw(&sql).await;
		session.release(result.is_ok()).await;
		result
	}

	/// Drain every pool. Sessions already loaned out survive until their
	/// own release.
	pub async fn shutdown(&self) {
		for pool in self.pools.values() {
			pool.shutdown().await;
		}
	}
}

impl Default for BackendRegistry {
	fn default() -> Self {
		Self::new()
	}
}
