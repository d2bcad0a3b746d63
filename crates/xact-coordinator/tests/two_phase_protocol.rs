//! Two-Phase Commit Protocol Tests
//!
//! Drives the transaction state machine against scripted sessions and
//! asserts the exact XA statement sequences, state transitions and session
//! accounting. No database required.
//!
//! **Test Coverage:**
//! - Happy path: START → work → END → PREPARE → COMMIT per participant
//! - Statement ordering and single-branch-per-participant
//! - Branch-id derivation and cross-transaction uniqueness
//! - Status snapshots and the diagnostic operation log
//! - Session conservation through cleanup

use xact_backends::{QueryValue, Row, Session};
use xact_coordinator::{
	operation, TransactionOptions, TransactionState, XaTransaction,
};
use xact_test::{ScriptedSession, SessionJournal};

fn two_scripted_sessions(journal: &SessionJournal) -> Vec<Box<dyn Session>> {
	vec![
		ScriptedSession::new("db1", journal).boxed(),
		ScriptedSession::new("db2", journal).boxed(),
	]
}

// ============================================================================
// Happy Path
// ============================================================================

/// Full transfer-shaped transaction across two participants.
///
/// **Test Intent**: Verify every participant sees exactly
/// START → work → END → PREPARE → COMMIT on its own session, in order.
#[tokio::test]
async fn happy_path_issues_the_canonical_xa_sequence() {
	let journal = SessionJournal::new();
	let balance_row = Row::new().with("balance", QueryValue::Float(5000.0));
	let sessions: Vec<Box<dyn Session>> = vec![
		ScriptedSession::new("db1", &journal)
			.respond_with("SELECT balance", vec![balance_row])
			.boxed(),
		ScriptedSession::new("db2", &journal).boxed(),
	];

	let tx = XaTransaction::from_sessions(sessions, TransactionOptions::default());
	assert_eq!(
		tx.participant_ids().to_vec(),
		vec!["participant_1", "participant_2"]
	);

	tx.begin().await.expect("begin should succeed");
	assert_eq!(tx.status().await.state, TransactionState::Active);

	let balance: f64 = tx
		.execute_operation(
			"participant_1",
			"check_balance",
			operation(|session| {
				Box::pin(async move {
					let row = session
						.fetch_optional(
							"SELECT balance FROM accounts WHERE id = ?",
							&[1001_i64.into()],
						)
						.await?;
					Ok(row.map(|r| r.f64("balance")).transpose()?.unwrap_or(0.0))
				})
			}),
		)
		.await
		.expect("check_balance should succeed");
	assert_eq!(balance, 5000.0);

	tx.execute_operation(
		"participant_1",
		"debit",
		operation(|session| {
			Box::pin(async move {
				session
					.execute(
						"UPDATE accounts SET balance = balance - ? WHERE id = ?",
						&[500.0.into(), 1001_i64.into()],
					)
					.await?;
				Ok(())
			})
		}),
	)
	.await
	.expect("debit should succeed");

	tx.execute_operation(
		"participant_2",
		"record_transfer",
		operation(|session| {
			Box::pin(async move {
				session
					.execute(
						"INSERT INTO transactions (from_account, to_account, amount) VALUES (?, ?, ?)",
						&[1001_i64.into(), 1002_i64.into(), 500.0.into()],
					)
					.await?;
				Ok(())
			})
		}),
	)
	.await
	.expect("record_transfer should succeed");

	tx.prepare().await.expect("prepare should succeed");
	assert_eq!(tx.status().await.state, TransactionState::Prepared);

	let outcome = tx.commit().await.expect("commit should succeed");
	assert!(outcome.is_clean());
	assert_eq!(tx.status().await.state, TransactionState::Committed);

	tx.cleanup().await;

	let txid = tx.txid().to_string();
	let branch_1 = format!("{txid}_participant_1");
	let branch_2 = format!("{txid}_participant_2");

	assert_eq!(
		journal.statements_for("db1"),
		vec![
			format!("XA START '{branch_1}'"),
			"SELECT balance FROM accounts WHERE id = ?".to_string(),
			"UPDATE accounts SET balance = balance - ? WHERE id = ?".to_string(),
			format!("XA END '{branch_1}'"),
			format!("XA PREPARE '{branch_1}'"),
			format!("XA COMMIT '{branch_1}'"),
		]
	);
	assert_eq!(
		journal.statements_for("db2"),
		vec![
			format!("XA START '{branch_2}'"),
			"INSERT INTO transactions (from_account, to_account, amount) VALUES (?, ?, ?)"
				.to_string(),
			format!("XA END '{branch_2}'"),
			format!("XA PREPARE '{branch_2}'"),
			format!("XA COMMIT '{branch_2}'"),
		]
	);

	// Clean commit returns both sessions reusable.
	assert_eq!(
		journal.releases(),
		vec![("db1".to_string(), true), ("db2".to_string(), true)]
	);
	assert!(journal.is_balanced());
}

/// Participants are driven in enlistment order during every phase.
///
/// **Test Intent**: Verify phase-1 and phase-2 ordering follows registry
/// order (participant_1 strictly before participant_2).
#[tokio::test]
async fn phases_run_in_enlistment_order() {
	let journal = SessionJournal::new();
	let tx = XaTransaction::from_sessions(
		two_scripted_sessions(&journal),
		TransactionOptions::default(),
	);

	tx.begin().await.unwrap();
	tx.prepare().await.unwrap();
	tx.commit().await.unwrap();
	tx.cleanup().await;

	let all = journal.entries();
	let order_of = |sql_fragment: &str, session: &str| {
		all.iter()
			.position(|e| e.session == session && e.sql.contains(sql_fragment))
			.unwrap_or_else(|| panic!("no {sql_fragment} on {session}"))
	};

	for verb in ["XA START", "XA END", "XA PREPARE", "XA COMMIT"] {
		assert!(
			order_of(verb, "db1") < order_of(verb, "db2"),
			"{verb} must reach participant_1 first"
		);
	}
}

// ============================================================================
// Protocol Properties
// ============================================================================

/// Single-branch-per-participant: at most one START/END/PREPARE per branch.
///
/// **Test Intent**: Verify the one-branch-per-participant accounting on a
/// committed transaction.
#[tokio::test]
async fn each_participant_sees_exactly_one_branch() {
	let journal = SessionJournal::new();
	let tx = XaTransaction::from_sessions(
		two_scripted_sessions(&journal),
		TransactionOptions::default(),
	);

	tx.begin().await.unwrap();
	tx.prepare().await.unwrap();
	tx.commit().await.unwrap();
	tx.cleanup().await;

	for session in ["db1", "db2"] {
		let statements = journal.statements_for(session);
		let count = |verb: &str| statements.iter().filter(|s| s.starts_with(verb)).count();
		assert_eq!(count("XA START"), 1, "{session}");
		assert_eq!(count("XA END"), 1, "{session}");
		assert_eq!(count("XA PREPARE"), 1, "{session}");
		assert_eq!(count("XA COMMIT"), 1, "{session}");
		assert_eq!(count("XA ROLLBACK"), 0, "{session}");
	}
}

/// Branch ids are `<txid>_<participant_id>` and disjoint across
/// transactions.
///
/// **Test Intent**: Verify branch-id derivation and cross-transaction
/// uniqueness from status snapshots.
#[tokio::test]
async fn branch_ids_are_derived_and_globally_unique() {
	let journal = SessionJournal::new();
	let tx_a = XaTransaction::from_sessions(
		two_scripted_sessions(&journal),
		TransactionOptions::default(),
	);
	let tx_b = XaTransaction::from_sessions(
		two_scripted_sessions(&journal),
		TransactionOptions::default(),
	);

	let status_a = tx_a.status().await;
	let status_b = tx_b.status().await;

	for (status, tx) in [(&status_a, &tx_a), (&status_b, &tx_b)] {
		for participant in &status.participants {
			assert_eq!(
				participant.branch_id,
				format!("{}_{}", tx.txid(), participant.participant_id)
			);
		}
	}

	let branches_a: Vec<&str> = status_a
		.participants
		.iter()
		.map(|p| p.branch_id.as_str())
		.collect();
	assert!(
		status_b
			.participants
			.iter()
			.all(|p| !branches_a.contains(&p.branch_id.as_str())),
		"branch ids must not repeat across transactions"
	);

	tx_a.cleanup().await;
	tx_b.cleanup().await;
}

// ============================================================================
// Snapshots & Operation Log
// ============================================================================

/// The status snapshot reflects participants, timeouts and the operation
/// count, and serializes for export.
///
/// **Test Intent**: Verify `status()` content and its serde shape.
#[tokio::test]
async fn status_snapshot_reports_participants_and_operations() {
	let journal = SessionJournal::new();
	let tx = XaTransaction::from_sessions(
		two_scripted_sessions(&journal),
		TransactionOptions::default(),
	);

	tx.begin().await.unwrap();
	tx.execute_operation(
		"participant_1",
		"noop",
		operation(|session| {
			Box::pin(async move {
				session.execute("UPDATE t SET x = 1", &[]).await?;
				Ok(())
			})
		}),
	)
	.await
	.unwrap();

	let status = tx.status().await;
	assert_eq!(status.txid, tx.txid());
	assert_eq!(status.state, TransactionState::Active);
	assert_eq!(status.participants.len(), 2);
	assert_eq!(status.operation_count, 1);
	assert_eq!(status.global_timeout_secs, 60.0);
	assert_eq!(status.prepare_timeout_secs, 30.0);
	assert!(status.elapsed_secs >= 0.0);
	assert_eq!(status.participants[0].backend_id, "db1");

	let json = serde_json::to_value(&status).unwrap();
	assert_eq!(json["state"], "ACTIVE");
	assert_eq!(json["participants"][1]["participant_id"], "participant_2");

	let operations = tx.operations().await;
	assert_eq!(operations.len(), 1);
	assert_eq!(operations[0].participant_id, "participant_1");
	assert_eq!(operations[0].operation, "noop");

	tx.cleanup().await;
}

/// Cleanup is idempotent and releases every session exactly once.
///
/// **Test Intent**: Verify session conservation across repeated cleanup
/// and rollback calls.
#[tokio::test]
async fn cleanup_is_idempotent_and_conserves_sessions() {
	let journal = SessionJournal::new();
	let tx = XaTransaction::from_sessions(
		two_scripted_sessions(&journal),
		TransactionOptions::default(),
	);

	tx.begin().await.unwrap();
	tx.cleanup().await;
	assert_eq!(tx.status().await.state, TransactionState::Aborted);

	// Second cleanup and a late rollback find nothing left to do.
	tx.cleanup().await;
	tx.rollback().await.unwrap();

	assert_eq!(journal.created_count(), 2);
	assert_eq!(journal.release_count(), 2);
	assert!(journal.is_balanced());
}
