//! The 2PC transaction state machine
//!
//! [`XaTransaction`] drives START → work → END → PREPARE → COMMIT|ROLLBACK
//! across an ordered participant list, one XA branch per participant, all on
//! sessions it owns exclusively until terminal state.
//!
//! All transitions are serialized under one per-transaction mutex. Methods
//! take `&self`, so a transaction can be shared behind an `Arc` and rolled
//! back from another task while an operation is in flight; the rollback
//! simply runs when the lock frees.
//!
//! Two deadlines apply. The global deadline is checked at the start of
//! `begin`, every `execute_operation` and the start of `prepare`; a miss
//! drives the transaction to `ABORTED` and surfaces
//! [`TransactionError::Timeout`]. The prepare deadline is measured from
//! entry into `PREPARING` and checked before each participant's
//! `XA PREPARE`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use xact_backends::{escape_branch_id, BackendError, BackendRegistry, Session};
use xact_conf::CoordinatorSettings;

use crate::error::{BoxError, Result, TimeoutScope, TransactionError};
use crate::participant::{Participant, ParticipantStatus};
use crate::state::{ParticipantState, TransactionState};
use crate::telemetry;

/// What a failed commit leg does to the caller-visible result.
///
/// Under either policy every reachable participant is still committed and
/// the transaction ends `COMMITTED`: once the votes are in, aborting is no
/// longer an option. The policies only differ in how loudly a failed leg is
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
	/// Failed legs come back as warnings on [`CommitOutcome`]
	#[default]
	Lenient,
	/// Failed legs convert the return value into
	/// [`TransactionError::CommitIncomplete`]
	Strict,
}

/// Per-transaction deadlines and commit policy.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
	/// Deadline measured from transaction construction
	pub global_timeout: Duration,
	/// Phase-local deadline measured from entry into PREPARING
	pub prepare_timeout: Duration,
	pub commit_policy: CommitPolicy,
}

impl Default for TransactionOptions {
	fn default() -> Self {
		Self {
			global_timeout: Duration::from_secs(60),
			prepare_timeout: Duration::from_secs(30),
			commit_policy: CommitPolicy::default(),
		}
	}
}

impl From<&CoordinatorSettings> for TransactionOptions {
	fn from(settings: &CoordinatorSettings) -> Self {
		Self {
			global_timeout: settings.transaction_timeout,
			prepare_timeout: settings.prepare_timeout,
			commit_policy: CommitPolicy::default(),
		}
	}
}

/// Result of a successful commit.
///
/// `warnings` maps participant ids to driver diagnostics for commit legs
/// that failed after the unanimous yes vote. Empty on a clean commit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitOutcome {
	pub warnings: BTreeMap<String, String>,
}

impl CommitOutcome {
	pub fn is_clean(&self) -> bool {
		self.warnings.is_empty()
	}
}

/// One entry in the transaction's diagnostic operation log.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
	pub participant_id: String,
	pub operation: String,
	pub at: DateTime<Utc>,
}

/// Read-only transaction snapshot, consistent with the most recent
/// successful transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionStatus {
	pub txid: String,
	pub state: TransactionState,
	pub started_at: DateTime<Utc>,
	pub global_timeout_secs: f64,
	pub prepare_timeout_secs: f64,
	pub participants: Vec<ParticipantStatus>,
	pub operation_count: usize,
	pub elapsed_secs: f64,
}

/// The future an operation closure returns; borrows the session it was
/// handed.
pub type OperationFuture<'s, T> = BoxFuture<'s, std::result::Result<T, BoxError>>;

/// Identity helper that pins the higher-ranked lifetime of an operation
/// closure so inline closures infer the right signature.
///
/// # Examples
///
/// ```no_run
/// use xact_backends::Session;
/// use xact_coordinator::{operation, XaTransaction};
///
/// # async fn example(tx: &XaTransaction) -> Result<(), Box<dyn std::error::Error>> {
/// let balance: f64 = tx
/// 	.execute_operation(
/// 		"participant_1",
/// 		"check_balance",
/// 		operation(|session| {
/// 			Box::pin(async move {
/// 				let row = session
/// 					.fetch_optional(
/// 						"SELECT balance FROM accounts WHERE id = ?",
/// 						&[1001_i64.into()],
/// 					)
/// 					.await?;
/// 				Ok(row.map(|r| r.f64("balance")).transpose()?.unwrap_or(0.0))
/// 			})
/// 		}),
/// 	)
/// 	.await?;
/// # let _ = balance;
/// # Ok(())
/// # }
/// ```
pub fn operation<T, F>(op: F) -> F
where
	F: Send + for<'s> FnOnce(&'s mut dyn Session) -> OperationFuture<'s, T>,
{
	op
}

struct TxInner {
	state: TransactionState,
	participants: Vec<Participant>,
	operations: Vec<OperationRecord>,
}

/// A distributed transaction across one XA branch per backend.
///
/// Construction loans one session per backend from the registry and derives
/// the branch ids; [`cleanup`](Self::cleanup) returns every session exactly
/// once. The typical caller shape:
///
/// ```no_run
/// use xact_backends::{BackendRegistry, Session};
/// use xact_coordinator::{operation, TransactionOptions, XaTransaction};
///
/// # async fn example(registry: &BackendRegistry) -> Result<(), Box<dyn std::error::Error>> {
/// let tx = XaTransaction::open(registry, TransactionOptions::default()).await?;
/// tx.begin().await?;
///
/// let result = async {
/// 	tx.execute_operation(
/// 		"participant_1",
/// 		"debit",
/// 		operation(|session| {
/// 			Box::pin(async move {
/// 				session
/// 					.execute(
/// 						"UPDATE accounts SET balance = balance - ? WHERE id = ?",
/// 						&[500.0.into(), 1001_i64.into()],
/// 					)
/// 					.await?;
/// 				Ok(())
/// 			})
/// 		}),
/// 	)
/// 	.await?;
/// 	tx.prepare().await?;
/// 	tx.commit().await
/// }
/// .await;
///
/// if result.is_err() {
/// 	tx.rollback().await?;
/// }
/// tx.cleanup().await;
/// # Ok(())
/// # }
/// ```
pub struct XaTransaction {
	txid: String,
	started_at: DateTime<Utc>,
	started_monotonic: Instant,
	options: TransactionOptions,
	participant_ids: Vec<String>,
	inner: Mutex<TxInner>,
}

impl XaTransaction {
	/// Create a transaction over one session per registered backend, in
	/// registry order.
	pub async fn open(registry: &BackendRegistry, options: TransactionOptions) -> Result<Self> {
		let sessions = registry.acquire_all().await?;
		Ok(Self::from_sessions(sessions, options))
	}

	/// Create a transaction over explicit sessions.
	///
	/// Participant ids `participant_1..n` follow session order; each branch
	/// id is `<txid>_<participant_id>`.
	pub fn from_sessions(sessions: Vec<Box<dyn Session>>, options: TransactionOptions) -> Self {
		let txid = Uuid::new_v4().to_string();
		let participants: Vec<Participant> = sessions
			.into_iter()
			.enumerate()
			.map(|(index, session)| Participant::new(index, &txid, session))
			.collect();
		let participant_ids: Vec<String> = participants
			.iter()
			.map(|p| p.participant_id.clone())
			.collect();

		telemetry::transaction_opened(&txid, &participant_ids);

		Self {
			txid,
			started_at: Utc::now(),
			started_monotonic: Instant::now(),
			options,
			participant_ids,
			inner: Mutex::new(TxInner {
				state: TransactionState::Init,
				participants,
				operations: Vec::new(),
			}),
		}
	}

	pub fn txid(&self) -> &str {
		&self.txid
	}

	/// Participant ids in enlistment order.
	pub fn participant_ids(&self) -> &[String] {
		&self.participant_ids
	}

	fn global_deadline_missed(&self) -> Option<Duration> {
		let elapsed = self.started_monotonic.elapsed();
		(elapsed > self.options.global_timeout).then_some(elapsed)
	}

	fn timeout_error(&self, scope: TimeoutScope, elapsed: Duration) -> TransactionError {
		TransactionError::Timeout {
			txid: self.txid.clone(),
			scope,
			elapsed,
		}
	}

	fn wrong_state(&self, state: TransactionState, required: &'static str) -> TransactionError {
		TransactionError::NotActive {
			txid: self.txid.clone(),
			state,
			required,
		}
	}

	/// Start an XA branch on every participant and move to ACTIVE.
	///
	/// On any `XA START` failure the branches already started are closed
	/// best-effort, the transaction ends ABORTED and the error names the
	/// offending participant.
	pub async fn begin(&self) -> Result<()> {
		let mut inner = self.inner.lock().await;
		if inner.state != TransactionState::Init {
			return Err(self.wrong_state(inner.state, "INIT"));
		}
		if let Some(elapsed) = self.global_deadline_missed() {
			self.abort_locked(&mut inner).await;
			return Err(self.timeout_error(TimeoutScope::Global, elapsed));
		}

		let mut failure: Option<(usize, BackendError)> = None;
		for index in 0..inner.participants.len() {
			let participant = &mut inner.participants[index];
			let sql = xa_statement("XA START", &participant.branch_id);
			let result = match participant.session.as_mut() {
				Some(session) => session.raw(&sql).await,
				None => Err(released_session_error(&participant.participant_id)),
			};
			match result {
				Ok(()) => {
					participant.branch_started = true;
					participant.touch();
					telemetry::branch_started(
						&self.txid,
						&participant.participant_id,
						&participant.branch_id,
					);
				}
				Err(err) => {
					participant.state = ParticipantState::Failed;
					participant.touch();
					failure = Some((index, err));
					break;
				}
			}
		}

		if let Some((index, err)) = failure {
			let participant_id = inner.participants[index].participant_id.clone();
			self.abort_locked(&mut inner).await;
			return Err(TransactionError::BeginFailed {
				participant: participant_id,
				source: err,
			});
		}

		inner.state = TransactionState::Active;
		telemetry::transaction_begun(&self.txid);
		Ok(())
	}

	/// Run a caller-supplied operation on the named participant's session.
	///
	/// Refused outside ACTIVE and past the global deadline. The operation
	/// is appended to the diagnostic log before it runs; a closure error
	/// marks the participant FAILED and propagates unchanged. The closure's
	/// value is returned verbatim.
	pub async fn execute_operation<T, F>(
		&self,
		participant_id: &str,
		operation: &str,
		op: F,
	) -> Result<T>
	where
		F: Send + for<'s> FnOnce(&'s mut dyn Session) -> OperationFuture<'s, T>,
		T: Send,
	{
		let mut inner = self.inner.lock().await;
		if inner.state != TransactionState::Active {
			return Err(self.wrong_state(inner.state, "ACTIVE"));
		}
		if let Some(elapsed) = self.global_deadline_missed() {
			self.abort_locked(&mut inner).await;
			return Err(self.timeout_error(TimeoutScope::Global, elapsed));
		}

		let index = inner
			.participants
			.iter()
			.position(|p| p.participant_id == participant_id)
			.ok_or_else(|| TransactionError::UnknownParticipant {
				participant: participant_id.to_string(),
			})?;

		inner.operations.push(OperationRecord {
			participant_id: participant_id.to_string(),
			operation: operation.to_string(),
			at: Utc::now(),
		});

		let participant = &mut inner.participants[index];
		let session = participant
			.session
			.as_mut()
			.ok_or_else(|| TransactionError::SessionReleased {
				participant: participant_id.to_string(),
			})?;

		match op(session.as_mut()).await {
			Ok(value) => {
				participant.touch();
				telemetry::operation_recorded(&self.txid, participant_id, operation);
				Ok(value)
			}
			Err(source) => {
				participant.state = ParticipantState::Failed;
				participant.touch();
				Err(TransactionError::OperationFailed {
					participant: participant_id.to_string(),
					source,
				})
			}
		}
	}

	/// Phase 1: `XA END` + `XA PREPARE` on every participant, sequentially
	/// in enlistment order.
	///
	/// Any failed vote rolls back every participant and ends the
	/// transaction ABORTED. On success every participant is PREPARED and
	/// the only remaining legal moves are [`commit`](Self::commit) and
	/// [`rollback`](Self::rollback).
	pub async fn prepare(&self) -> Result<()> {
		let mut inner = self.inner.lock().await;
		if inner.state != TransactionState::Active {
			return Err(self.wrong_state(inner.state, "ACTIVE"));
		}
		if let Some(elapsed) = self.global_deadline_missed() {
			self.abort_locked(&mut inner).await;
			return Err(self.timeout_error(TimeoutScope::Global, elapsed));
		}

		// A participant that already failed an operation can never vote
		// yes; don't bother asking the others.
		if let Some(failed) = inner
			.participants
			.iter()
			.find(|p| p.state == ParticipantState::Failed)
		{
			let participant_id = failed.participant_id.clone();
			self.abort_locked(&mut inner).await;
			return Err(TransactionError::PrepareFailed {
				participant: participant_id,
				source: BackendError::Query(
					"participant failed before the prepare phase".to_string(),
				),
			});
		}

		inner.state = TransactionState::Preparing;
		let phase_started = Instant::now();

		for index in 0..inner.participants.len() {
			let phase_elapsed = phase_started.elapsed();
			if phase_elapsed > self.options.prepare_timeout {
				let participant_id = inner.participants[index].participant_id.clone();
				telemetry::prepare_vote(&self.txid, &participant_id, false);
				self.abort_locked(&mut inner).await;
				return Err(self.timeout_error(TimeoutScope::Prepare, phase_elapsed));
			}

			let failure: Option<BackendError> = {
				let participant = &mut inner.participants[index];
				let result = match participant.session.as_mut() {
					Some(session) => {
						let end = xa_statement("XA END", &participant.branch_id);
						let prepare = xa_statement("XA PREPARE", &participant.branch_id);
						match session.raw(&end).await {
							Ok(()) => session.raw(&prepare).await,
							Err(err) => Err(err),
						}
					}
					None => Err(released_session_error(&participant.participant_id)),
				};
				match result {
					Ok(()) => {
						participant.state = ParticipantState::Prepared;
						participant.touch();
						telemetry::prepare_vote(&self.txid, &participant.participant_id, true);
						None
					}
					Err(err) => {
						participant.state = ParticipantState::Failed;
						participant.touch();
						telemetry::prepare_vote(&self.txid, &participant.participant_id, false);
						Some(err)
					}
				}
			};

			if let Some(err) = failure {
				let participant_id = inner.participants[index].participant_id.clone();
				self.abort_locked(&mut inner).await;
				return Err(TransactionError::PrepareFailed {
					participant: participant_id,
					source: err,
				});
			}
		}

		inner.state = TransactionState::Prepared;
		telemetry::transaction_prepared(&self.txid);
		Ok(())
	}

	/// Phase 2: `XA COMMIT` on every participant.
	///
	/// A failed leg never stops the remaining legs: the unanimous vote
	/// already bound every participant to commit, so the transaction always
	/// finishes COMMITTED and failed legs surface as warnings (lenient
	/// policy) or as [`TransactionError::CommitIncomplete`] (strict).
	/// Branches left behind by failed legs are visible through
	/// `BackendRegistry::recover`.
	pub async fn commit(&self) -> Result<CommitOutcome> {
		let mut inner = self.inner.lock().await;
		if inner.state != TransactionState::Prepared {
			return Err(self.wrong_state(inner.state, "PREPARED"));
		}

		inner.state = TransactionState::Committing;
		let mut warnings = BTreeMap::new();

		for participant in inner.participants.iter_mut() {
			let sql = xa_statement("XA COMMIT", &participant.branch_id);
			let result = match participant.session.as_mut() {
				Some(session) => session.raw(&sql).await,
				None => Err(released_session_error(&participant.participant_id)),
			};
			match result {
				Ok(()) => {
					participant.state = ParticipantState::Committed;
					participant.touch();
				}
				Err(err) => {
					participant.state = ParticipantState::Failed;
					participant.touch();
					telemetry::commit_leg_failed(
						&self.txid,
						&participant.participant_id,
						&participant.branch_id,
						&err.to_string(),
					);
					warnings.insert(participant.participant_id.clone(), err.to_string());
				}
			}
		}

		inner.state = TransactionState::Committed;
		telemetry::transaction_committed(&self.txid, warnings.is_empty());

		if self.options.commit_policy == CommitPolicy::Strict && !warnings.is_empty() {
			return Err(TransactionError::CommitIncomplete {
				txid: self.txid.clone(),
				warnings,
			});
		}
		Ok(CommitOutcome { warnings })
	}

	/// Roll back every participant and end the transaction ABORTED.
	///
	/// Accepted from any state; on a transaction already terminal this is a
	/// no-op. Rollback statement failures are logged and swallowed; the
	/// transaction reaches ABORTED regardless.
	pub async fn rollback(&self) -> Result<()> {
		let mut inner = self.inner.lock().await;
		self.abort_locked(&mut inner).await;
		Ok(())
	}

	/// Idempotent terminator: roll back when non-terminal, then return
	/// every loaned session to its pool exactly once.
	///
	/// Clean sessions go back reusable; sessions of FAILED participants are
	/// discarded, which also rolls back any branch the server still holds
	/// un-prepared.
	pub async fn cleanup(&self) {
		let mut inner = self.inner.lock().await;
		if !inner.state.is_terminal() {
			self.abort_locked(&mut inner).await;
		}
		for participant in inner.participants.iter_mut() {
			if let Some(session) = participant.session.take() {
				let ok = participant.state != ParticipantState::Failed;
				session.release(ok).await;
			}
		}
	}

	/// Snapshot of the transaction, consistent with the most recent
	/// successful transition.
	pub async fn status(&self) -> TransactionStatus {
		let inner = self.inner.lock().await;
		TransactionStatus {
			txid: self.txid.clone(),
			state: inner.state,
			started_at: self.started_at,
			global_timeout_secs: self.options.global_timeout.as_secs_f64(),
			prepare_timeout_secs: self.options.prepare_timeout.as_secs_f64(),
			participants: inner.participants.iter().map(Participant::status).collect(),
			operation_count: inner.operations.len(),
			elapsed_secs: self.started_monotonic.elapsed().as_secs_f64(),
		}
	}

	/// The diagnostic operation log (append-only, not a replay log).
	pub async fn operations(&self) -> Vec<OperationRecord> {
		self.inner.lock().await.operations.clone()
	}

	/// Internal rollback. Callers hold the lock and decide the surfaced
	/// error; this only drives participants and the state.
	async fn abort_locked(&self, inner: &mut TxInner) {
		if inner.state.is_terminal() {
			return;
		}
		inner.state = TransactionState::Aborting;

		for participant in inner.participants.iter_mut() {
			let verbs: &[&str] = match participant.state {
				ParticipantState::Prepared => &["XA ROLLBACK"],
				ParticipantState::Active if participant.branch_started => {
					&["XA END", "XA ROLLBACK"]
				}
				// FAILED, ABORTED, or no branch started: nothing to undo
				// here; discarding the session at cleanup rolls back any
				// server-side remnant.
				_ => &[],
			};
			if verbs.is_empty() {
				continue;
			}
			let Some(session) = participant.session.as_mut() else {
				continue;
			};

			let mut rolled_back = true;
			for verb in verbs {
				let sql = xa_statement(verb, &participant.branch_id);
				if let Err(err) = session.raw(&sql).await {
					tracing::warn!(
						target: "xact::transaction",
						txid = %self.txid,
						participant = %participant.participant_id,
						error = %err,
						"rollback statement failed"
					);
					rolled_back = false;
					break;
				}
			}
			participant.state = if rolled_back {
				ParticipantState::Aborted
			} else {
				ParticipantState::Failed
			};
			participant.touch();
		}

		inner.state = TransactionState::Aborted;
		telemetry::transaction_aborted(&self.txid);
	}
}

impl Drop for XaTransaction {
	fn drop(&mut self) {
		// Rollback needs I/O and cannot run here; just make the leak
		// visible.
		if let Ok(inner) = self.inner.try_lock() {
			let leaked = inner.participants.iter().any(|p| p.session.is_some());
			if leaked && !inner.state.is_terminal() {
				tracing::warn!(
					target: "xact::transaction",
					txid = %self.txid,
					state = %inner.state,
					"transaction dropped without cleanup; sessions discarded"
				);
			}
		}
	}
}

fn xa_statement(verb: &str, branch_id: &str) -> String {
	format!("{verb} '{}'", escape_branch_id(branch_id))
}

fn released_session_error(participant_id: &str) -> BackendError {
	BackendError::Connect(format!(
		"participant '{participant_id}' has no live session"
	))
}
