//! Scripted in-memory sessions
//!
//! [`ScriptedSession`] implements the backend `Session` trait without a
//! database: every raw statement is recorded into a shared
//! [`SessionJournal`], failures can be injected by SQL fragment, and
//! queries answer with canned rows. Protocol tests assert the exact XA
//! statement sequences a transaction issued, plus session conservation
//! (every session created is released exactly once).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use xact_backends::{BackendError, QueryValue, Result, Row, Session};

/// One recorded statement.
#[derive(Clone, Debug, PartialEq)]
pub struct JournalEntry {
	/// Backend id of the session that ran the statement
	pub session: String,
	pub sql: String,
}

#[derive(Default)]
struct JournalInner {
	entries: Vec<JournalEntry>,
	created: usize,
	releases: Vec<(String, bool)>,
}

/// Shared recorder for every scripted session in a test.
#[derive(Clone, Default)]
pub struct SessionJournal {
	inner: Arc<Mutex<JournalInner>>,
}

impl SessionJournal {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every statement recorded, in execution order across all sessions.
	pub fn statements(&self) -> Vec<String> {
		self.inner
			.lock()
			.entries
			.iter()
			.map(|e| e.sql.clone())
			.collect()
	}

	/// Statements run by one session, in order.
	pub fn statements_for(&self, session: &str) -> Vec<String> {
		self.inner
			.lock()
			.entries
			.iter()
			.filter(|e| e.session == session)
			.map(|e| e.sql.clone())
			.collect()
	}

	pub fn entries(&self) -> Vec<JournalEntry> {
		self.inner.lock().entries.clone()
	}

	/// `(session, ok)` pairs in release order.
	pub fn releases(&self) -> Vec<(String, bool)> {
		self.inner.lock().releases.clone()
	}

	pub fn created_count(&self) -> usize {
		self.inner.lock().created
	}

	pub fn release_count(&self) -> usize {
		self.inner.lock().releases.len()
	}

	/// True when loans balance releases.
	pub fn is_balanced(&self) -> bool {
		let inner = self.inner.lock();
		inner.created == inner.releases.len()
	}

	fn record(&self, session: &str, sql: &str) {
		self.inner.lock().entries.push(JournalEntry {
			session: session.to_string(),
			sql: sql.to_string(),
		});
	}

	fn record_release(&self, session: &str, ok: bool) {
		self.inner.lock().releases.push((session.to_string(), ok));
	}

	fn record_created(&self) {
		self.inner.lock().created += 1;
	}
}

struct FailureRule {
	fragment: String,
	message: String,
}

struct ResponseRule {
	fragment: String,
	rows: Vec<Row>,
}

struct DelayRule {
	fragment: String,
	delay: std::time::Duration,
}

/// A `Session` whose behavior is fully scripted.
///
/// # Examples
///
/// ```
/// use xact_test::{ScriptedSession, SessionJournal};
///
/// let journal = SessionJournal::new();
/// let session = ScriptedSession::new("db1", &journal)
/// 	.fail_on("XA PREPARE", "XAER_RMERR: fault injected");
/// # let _ = session;
/// ```
pub struct ScriptedSession {
	id: String,
	journal: SessionJournal,
	failures: Vec<FailureRule>,
	responses: Vec<ResponseRule>,
	delays: Vec<DelayRule>,
}

impl ScriptedSession {
	pub fn new(id: impl Into<String>, journal: &SessionJournal) -> Self {
		journal.record_created();
		Self {
			id: id.into(),
			journal: journal.clone(),
			failures: Vec::new(),
			responses: Vec::new(),
			delays: Vec::new(),
		}
	}

	/// Fail every statement containing `fragment` with `message`.
	pub fn fail_on(mut self, fragment: impl Into<String>, message: impl Into<String>) -> Self {
		self.failures.push(FailureRule {
			fragment: fragment.into(),
			message: message.into(),
		});
		self
	}

	/// Answer queries containing `fragment` with `rows`.
	pub fn respond_with(mut self, fragment: impl Into<String>, rows: Vec<Row>) -> Self {
		self.responses.push(ResponseRule {
			fragment: fragment.into(),
			rows,
		});
		self
	}

	/// Sleep before completing statements containing `fragment`. Used to
	/// script slow participants for deadline tests.
	pub fn delay_on(mut self, fragment: impl Into<String>, delay: std::time::Duration) -> Self {
		self.delays.push(DelayRule {
			fragment: fragment.into(),
			delay,
		});
		self
	}

	pub fn boxed(self) -> Box<dyn Session> {
		Box::new(self)
	}

	async fn run(&self, sql: &str) -> Result<()> {
		if let Some(rule) = self.delays.iter().find(|rule| sql.contains(&rule.fragment)) {
			tokio::time::sleep(rule.delay).await;
		}
		self.journal.record(&self.id, sql);
		match self.failures.iter().find(|rule| sql.contains(&rule.fragment)) {
			Some(rule) => Err(BackendError::Query(rule.message.clone())),
			None => Ok(()),
		}
	}

	fn rows_for(&self, sql: &str) -> Vec<Row> {
		self.responses
			.iter()
			.find(|rule| sql.contains(&rule.fragment))
			.map(|rule| rule.rows.clone())
			.unwrap_or_default()
	}
}

#[async_trait]
impl Session for ScriptedSession {
	fn backend_id(&self) -> &str {
		&self.id
	}

	async fn raw(&mut self, sql: &str) -> Result<()> {
		self.run(sql).await
	}

	async fn execute(&mut self, sql: &str, _params: &[QueryValue]) -> Result<u64> {
		self.run(sql).await?;
		Ok(1)
	}

	async fn fetch_all(&mut self, sql: &str, _params: &[QueryValue]) -> Result<Vec<Row>> {
		self.run(sql).await?;
		Ok(self.rows_for(sql))
	}

	async fn fetch_optional(&mut self, sql: &str, _params: &[QueryValue]) -> Result<Option<Row>> {
		self.run(sql).await?;
		Ok(self.rows_for(sql).into_iter().next())
	}

	async fn ping(&mut self) -> Result<()> {
		Ok(())
	}

	async fn release(self: Box<Self>, ok: bool) {
		self.journal.record_release(&self.id, ok);
	}
}
