//! Error taxonomy for coordinator operations
//!
//! Every phase reports the offending participant and carries the downstream
//! driver's message verbatim, either inline or as a chained source. Commit
//! warnings are not errors: a lenient commit returns them in
//! [`CommitOutcome`](crate::transaction::CommitOutcome).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use xact_backends::BackendError;

use crate::state::TransactionState;

/// Caller-operation error channel: whatever the operation closure raised,
/// propagated unchanged.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which deadline was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
	Global,
	Prepare,
}

impl fmt::Display for TimeoutScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TimeoutScope::Global => f.write_str("global"),
			TimeoutScope::Prepare => f.write_str("prepare"),
		}
	}
}

/// Coordinator operation errors
#[derive(Error, Debug)]
pub enum TransactionError {
	/// Operation requested in a state that does not admit it
	#[error("transaction {txid} is in state {state}; operation requires {required}")]
	NotActive {
		txid: String,
		state: TransactionState,
		required: &'static str,
	},

	/// A deadline was exceeded; the transaction has been driven to ABORTED
	#[error("transaction {txid} exceeded its {scope} deadline after {elapsed:?}")]
	Timeout {
		txid: String,
		scope: TimeoutScope,
		elapsed: Duration,
	},

	/// `XA START` failed while enlisting a participant
	#[error("failed to start branch for participant '{participant}': {source}")]
	BeginFailed {
		participant: String,
		#[source]
		source: BackendError,
	},

	/// The caller-supplied operation raised; the error is propagated
	/// unchanged as the source
	#[error("operation failed on participant '{participant}': {source}")]
	OperationFailed {
		participant: String,
		#[source]
		source: BoxError,
	},

	/// A participant voted no or errored during phase 1
	#[error("prepare vote failed for participant '{participant}': {source}")]
	PrepareFailed {
		participant: String,
		#[source]
		source: BackendError,
	},

	/// No participant with the requested id in this transaction
	#[error("unknown participant '{participant}'")]
	UnknownParticipant { participant: String },

	/// The participant's session has already been released
	#[error("participant '{participant}' has no live session")]
	SessionReleased { participant: String },

	/// Strict commit policy: every leg was driven but at least one failed.
	/// The transaction is COMMITTED; the listed branches need operator
	/// recovery.
	#[error("transaction {txid} committed with failed legs: {}", format_participants(.warnings))]
	CommitIncomplete {
		txid: String,
		warnings: BTreeMap<String, String>,
	},

	/// Failure below the coordinator (pool, registry, connection)
	#[error(transparent)]
	Backend(#[from] BackendError),
}

fn format_participants(warnings: &BTreeMap<String, String>) -> String {
	warnings
		.keys()
		.map(String::as_str)
		.collect::<Vec<_>>()
		.join(", ")
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, TransactionError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn messages_name_the_offending_participant() {
		let err = TransactionError::PrepareFailed {
			participant: "participant_2".to_string(),
			source: BackendError::Query("XAER_RMFAIL".to_string()),
		};
		let message = err.to_string();
		assert!(message.contains("participant_2"), "got: {message}");
		assert!(message.contains("XAER_RMFAIL"), "got: {message}");
	}

	#[test]
	fn commit_incomplete_lists_every_failed_leg() {
		let mut warnings = BTreeMap::new();
		warnings.insert("participant_1".to_string(), "gone".to_string());
		warnings.insert("participant_2".to_string(), "also gone".to_string());
		let err = TransactionError::CommitIncomplete {
			txid: "tx".to_string(),
			warnings,
		};
		let message = err.to_string();
		assert!(message.contains("participant_1"));
		assert!(message.contains("participant_2"));
	}
}
