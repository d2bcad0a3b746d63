//! Bounded session pool for one backend
//!
//! Each backend gets its own pool. Capacity is enforced with a semaphore:
//! a loan holds a permit for its whole lifetime, so `loaned + idle` can
//! never exceed the configured size. Sessions are validated with a
//! `SELECT 1` probe before they are handed out; a failed probe discards the
//! connection and transparently retries once with a fresh one.
//!
//! Acquire failures are retried with exponential backoff (seeded by the
//! configured retry interval, doubling per attempt). Between attempts the
//! idle set is thrown away so a recovered backend is reached with fresh
//! connections rather than dead ones.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use xact_conf::{BackendSettings, CoordinatorSettings};

use crate::error::{BackendError, Result};
use crate::session::{bind_params, decode_row, Session};
use crate::value::{QueryValue, Row};

/// How often a cached probe result stays valid.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Pool sizing and failure policy.
#[derive(Clone, Debug)]
pub struct PoolConfig {
	/// Upper bound on live sessions (loaned + idle)
	pub capacity: usize,
	/// Budget for one acquire attempt, including the initial connect
	pub acquire_timeout: Duration,
	/// Attempts before the backend is reported unavailable
	pub max_retry_attempts: u32,
	/// Backoff seed between attempts; doubles per attempt
	pub retry_interval: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			capacity: 5,
			acquire_timeout: Duration::from_secs(30),
			max_retry_attempts: 3,
			retry_interval: Duration::from_secs(1),
		}
	}
}

impl PoolConfig {
	/// Derive the pool policy from backend and coordinator settings.
	pub fn from_settings(backend: &BackendSettings, coordinator: &CoordinatorSettings) -> Self {
		Self {
			capacity: backend.pool_size,
			acquire_timeout: backend.connect_timeout,
			max_retry_attempts: coordinator.max_retry_attempts,
			retry_interval: coordinator.retry_interval,
		}
	}
}

#[derive(Clone, Copy, Default, Debug)]
struct ProbeState {
	available: bool,
	checked_monotonic: Option<Instant>,
	checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct PoolShared {
	backend_id: String,
	idle: Mutex<Vec<MySqlConnection>>,
	semaphore: Arc<Semaphore>,
	live: AtomicUsize,
	closed: AtomicBool,
	probe: Mutex<ProbeState>,
}

impl PoolShared {
	fn discard_one(&self) {
		self.live.fetch_sub(1, Ordering::SeqCst);
	}
}

/// A bounded pool of sessions to one backend.
#[derive(Debug)]
pub struct ConnectionPool {
	settings: BackendSettings,
	config: PoolConfig,
	shared: Arc<PoolShared>,
}

impl ConnectionPool {
	pub fn new(settings: BackendSettings, config: PoolConfig) -> Self {
		let shared = Arc::new(PoolShared {
			backend_id: settings.id.clone(),
			idle: Mutex::new(Vec::new()),
			semaphore: Arc::new(Semaphore::new(config.capacity)),
			live: AtomicUsize::new(0),
			closed: AtomicBool::new(false),
			probe: Mutex::new(ProbeState::default()),
		});
		Self {
			settings,
			config,
			shared,
		}
	}

	pub fn backend_id(&self) -> &str {
		&self.settings.id
	}

	pub fn settings(&self) -> &BackendSettings {
		&self.settings
	}

	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	/// Sessions currently resting in the idle set.
	pub fn idle_count(&self) -> usize {
		self.shared.idle.lock().len()
	}

	/// Connections currently in existence, loaned or idle.
	pub fn live_count(&self) -> usize {
		self.shared.live.load(Ordering::SeqCst)
	}

	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::SeqCst)
	}

	/// Cached availability from the most recent probe or acquire.
	pub fn available(&self) -> bool {
		self.shared.probe.lock().available
	}

	/// Wall-clock time of the most recent probe, if any.
	pub fn last_probe(&self) -> Option<DateTime<Utc>> {
		self.shared.probe.lock().checked_at
	}

	/// Loan out a validated session.
	///
	/// Retries up to the configured attempt count with exponential backoff,
	/// draining stale idle connections between attempts, and surfaces
	/// [`BackendError::Unavailable`] once every attempt has failed.
	pub async fn acquire(&self) -> Result<MySqlSession> {
		let attempts = self.config.max_retry_attempts.max(1);
		let mut backoff = self.config.retry_interval;
		let mut last_error = String::new();

		for attempt in 1..=attempts {
			match self.try_acquire().await {
				Ok(session) => {
					self.record_probe(true);
					return Ok(session);
				}
				Err(BackendError::PoolClosed(id)) => return Err(BackendError::PoolClosed(id)),
				Err(err) => {
					tracing::warn!(
						backend = %self.settings.id,
						attempt,
						error = %err,
						"session acquire attempt failed"
					);
					last_error = err.to_string();
					if attempt < attempts {
						// Idle connections are suspect after a failure;
						// start the next attempt from a clean slate.
						self.drain().await;
						tokio::time::sleep(backoff).await;
						backoff *= 2;
					}
				}
			}
		}

		self.record_probe(false);
		Err(BackendError::Unavailable {
			backend: self.settings.id.clone(),
			attempts,
			reason: last_error,
		})
	}

	/// One acquire attempt: wait for capacity, then validate an idle
	/// connection or dial a fresh one.
	async fn try_acquire(&self) -> Result<MySqlSession> {
		if self.is_closed() {
			return Err(BackendError::PoolClosed(self.settings.id.clone()));
		}

		let permit = tokio::time::timeout(
			self.config.acquire_timeout,
			Arc::clone(&self.shared.semaphore).acquire_owned(),
		)
		.await
		.map_err(|_| {
			BackendError::Connect(format!(
				"timed out after {:?} waiting for a free session",
				self.config.acquire_timeout
			))
		})?
		.map_err(|_| BackendError::PoolClosed(self.settings.id.clone()))?;

		// A dead idle connection is discarded and replaced once before the
		// attempt is counted as failed.
		let mut validations = 0;
		loop {
			let reused = self.shared.idle.lock().pop();
			let mut conn = match reused {
				Some(conn) => conn,
				None => self.connect_new().await?,
			};

			match sqlx::raw_sql("SELECT 1").execute(&mut conn).await {
				Ok(_) => {
					return Ok(MySqlSession {
						backend_id: self.settings.id.clone(),
						conn: Some(conn),
						lease: Some(PoolLease {
							shared: Arc::clone(&self.shared),
							_permit: permit,
						}),
					});
				}
				Err(err) => {
					self.shared.discard_one();
					drop(conn);
					validations += 1;
					if validations > 1 {
						return Err(BackendError::from(err));
					}
				}
			}
		}
	}

	async fn connect_new(&self) -> Result<MySqlConnection> {
		let options = self.connect_options();
		let conn = tokio::time::timeout(
			self.config.acquire_timeout,
			MySqlConnection::connect_with(&options),
		)
		.await
		.map_err(|_| {
			BackendError::Connect(format!(
				"connect to {}:{} timed out after {:?}",
				self.settings.host, self.settings.port, self.config.acquire_timeout
			))
		})?
		.map_err(BackendError::from)?;

		self.shared.live.fetch_add(1, Ordering::SeqCst);
		Ok(conn)
	}

	fn connect_options(&self) -> MySqlConnectOptions {
		MySqlConnectOptions::new()
			.host(&self.settings.host)
			.port(self.settings.port)
			.username(&self.settings.user)
			.password(&self.settings.password)
			.database(&self.settings.database)
	}

	/// Health-check the backend, at most once per probe interval.
	///
	/// Between refreshes the cached verdict is returned. A failed probe
	/// marks the backend unavailable until the next refresh.
	pub async fn probe(&self) -> bool {
		{
			let state = self.shared.probe.lock();
			if let Some(checked) = state.checked_monotonic {
				if checked.elapsed() < PROBE_INTERVAL {
					return state.available;
				}
			}
		}

		let healthy = match self.probe_once().await {
			Ok(()) => true,
			Err(err) => {
				tracing::warn!(
					backend = %self.settings.id,
					error = %err,
					"health probe failed"
				);
				false
			}
		};
		self.record_probe(healthy);
		healthy
	}

	async fn probe_once(&self) -> Result<()> {
		// Probes use a transient connection so they never compete with
		// transactions for pool capacity.
		let options = self.connect_options();
		let mut conn = tokio::time::timeout(
			self.config.acquire_timeout,
			MySqlConnection::connect_with(&options),
		)
		.await
		.map_err(|_| BackendError::Connect("probe connect timed out".to_string()))?
		.map_err(BackendError::from)?;

		sqlx::raw_sql("SELECT 1")
			.execute(&mut conn)
			.await
			.map_err(BackendError::from)?;
		let _ = conn.close().await;
		Ok(())
	}

	fn record_probe(&self, available: bool) {
		let mut state = self.shared.probe.lock();
		state.available = available;
		state.checked_monotonic = Some(Instant::now());
		state.checked_at = Some(Utc::now());
	}

	/// Return a loaned session, keeping it when `ok` and discarding it
	/// otherwise. Equivalent to [`Session::release`] on the session itself.
	pub async fn release(&self, session: MySqlSession, ok: bool) {
		session.restore(ok).await;
	}

	/// Discard every idle connection. Loaned sessions are unaffected and
	/// survive until their own release.
	pub async fn drain(&self) {
		let drained: Vec<MySqlConnection> = {
			let mut idle = self.shared.idle.lock();
			std::mem::take(&mut *idle)
		};
		for conn in drained {
			self.shared.discard_one();
			let _ = conn.close().await;
		}
	}

	/// Stop loaning sessions and discard the idle set.
	pub async fn shutdown(&self) {
		self.shared.closed.store(true, Ordering::SeqCst);
		self.shared.semaphore.close();
		self.drain().await;
	}
}

/// The lease a loaned session holds on its pool: a capacity permit plus the
/// route back into the idle set.
#[derive(Debug)]
pub(crate) struct PoolLease {
	shared: Arc<PoolShared>,
	_permit: OwnedSemaphorePermit,
}

/// A session backed by a dedicated `sqlx` MySQL connection.
///
/// XA requires every verb of a branch to run on the same connection, so the
/// connection is owned by the session for its whole loan, never shared.
#[derive(Debug)]
pub struct MySqlSession {
	backend_id: String,
	conn: Option<MySqlConnection>,
	lease: Option<PoolLease>,
}

impl MySqlSession {
	fn conn(&mut self) -> Result<&mut MySqlConnection> {
		self.conn
			.as_mut()
			.ok_or_else(|| BackendError::Connect("session already released".to_string()))
	}

	/// Run a raw statement and collect its result rows.
	///
	/// Needed for `XA RECOVER`, which MySQL rejects in the
	/// prepared-statement protocol just like the other XA verbs.
	pub(crate) async fn raw_fetch(&mut self, sql: &str) -> Result<Vec<Row>> {
		let conn = self.conn()?;
		let rows = sqlx::raw_sql(sql)
			.fetch_all(conn)
			.await
			.map_err(BackendError::from)?;
		rows.iter().map(decode_row).collect()
	}

	/// Hand the connection back to the pool (`ok`) or discard it.
	pub(crate) async fn restore(mut self, ok: bool) {
		let conn = self.conn.take();
		let lease = self.lease.take();
		let (Some(mut conn), Some(lease)) = (conn, lease) else {
			return;
		};

		if !ok || lease.shared.closed.load(Ordering::SeqCst) {
			lease.shared.discard_one();
			let _ = conn.close().await;
			return;
		}

		// Reset before reuse: clear any implicit transaction state. A
		// connection that cannot be reset is not worth keeping.
		match Executor::execute(&mut conn, sqlx::raw_sql("ROLLBACK")).await {
			Ok(_) => {
				lease.shared.idle.lock().push(conn);
				// Permit drops after the push so a racing acquire finds
				// the idle connection instead of dialing a new one.
				drop(lease);
			}
			Err(err) => {
				tracing::debug!(
					backend = %self.backend_id,
					error = %err,
					"discarding session that failed reset"
				);
				lease.shared.discard_one();
				let _ = conn.close().await;
			}
		}
	}
}

impl Drop for MySqlSession {
	fn drop(&mut self) {
		// A session dropped without release loses its connection; account
		// for it so the live count stays truthful.
		if self.conn.is_some() {
			if let Some(lease) = &self.lease {
				lease.shared.discard_one();
				tracing::debug!(
					backend = %self.backend_id,
					"session dropped without explicit release"
				);
			}
		}
	}
}

#[async_trait]
impl Session for MySqlSession {
	fn backend_id(&self) -> &str {
		&self.backend_id
	}

	async fn raw(&mut self, sql: &str) -> Result<()> {
		let conn = self.conn()?;
		Executor::execute(conn, sqlx::raw_sql(sql))
			.await
			.map_err(BackendError::from)?;
		Ok(())
	}

	async fn execute(&mut self, sql: &str, params: &[QueryValue]) -> Result<u64> {
		let conn = self.conn()?;
		let result = bind_params(sqlx::query(sql), params)
			.execute(&mut *conn)
			.await
			.map_err(BackendError::from)?;
		Ok(result.rows_affected())
	}

	async fn fetch_all(&mut self, sql: &str, params: &[QueryValue]) -> Result<Vec<Row>> {
		let conn = self.conn()?;
		let rows = bind_params(sqlx::query(sql), params)
			.fetch_all(conn)
			.await
			.map_err(BackendError::from)?;
		rows.iter().map(decode_row).collect()
	}

	async fn fetch_optional(&mut self, sql: &str, params: &[QueryValue]) -> Result<Option<Row>> {
		let conn = self.conn()?;
		let row = bind_params(sqlx::query(sql), params)
			.fetch_optional(conn)
			.await
			.map_err(BackendError::from)?;
		row.as_ref().map(decode_row).transpose()
	}

	async fn ping(&mut self) -> Result<()> {
		self.raw("SELECT 1").await
	}

	async fn release(self: Box<Self>, ok: bool) {
		(*self).restore(ok).await;
	}
}
