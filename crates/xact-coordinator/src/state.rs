//! Transaction and participant state machines
//!
//! The transaction state graph:
//!
//! ```text
//! INIT ──begin──► ACTIVE ──prepare──► PREPARING ──all-ok──► PREPARED ──commit──► COMMITTING ──► COMMITTED
//!    │             │                     │ any-fail                                  │ any-fail
//!    ▼             ▼                     ▼                                           ▼
//! ABORTED ◄── ABORTING ◄──────────────── (rollback) ◄────────────────── (report, continue)
//! ```
//!
//! `COMMITTED` and `ABORTED` are terminal. A commit-phase failure on one
//! participant does not abort the transaction: the prepared votes already
//! bound every participant to commit.

use std::fmt;

use serde::Serialize;

/// Coordinator-level transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
	Init,
	Active,
	Preparing,
	Prepared,
	Committing,
	Committed,
	Aborting,
	Aborted,
}

impl TransactionState {
	/// Terminal states admit no further transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, TransactionState::Committed | TransactionState::Aborted)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			TransactionState::Init => "INIT",
			TransactionState::Active => "ACTIVE",
			TransactionState::Preparing => "PREPARING",
			TransactionState::Prepared => "PREPARED",
			TransactionState::Committing => "COMMITTING",
			TransactionState::Committed => "COMMITTED",
			TransactionState::Aborting => "ABORTING",
			TransactionState::Aborted => "ABORTED",
		}
	}
}

impl fmt::Display for TransactionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Per-participant state within one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
	Active,
	Prepared,
	Committed,
	Aborted,
	Failed,
}

impl ParticipantState {
	pub fn as_str(&self) -> &'static str {
		match self {
			ParticipantState::Active => "ACTIVE",
			ParticipantState::Prepared => "PREPARED",
			ParticipantState::Committed => "COMMITTED",
			ParticipantState::Aborted => "ABORTED",
			ParticipantState::Failed => "FAILED",
		}
	}
}

impl fmt::Display for ParticipantState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
