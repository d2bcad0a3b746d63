//! Transaction lifecycle events
//!
//! Structured `tracing` events for the 2PC boundaries and per-participant
//! outcomes, grouped here so every phase reports the same field names
//! (`txid`, `participant`, `branch`).

const TARGET: &str = "xact::transaction";

pub(crate) fn transaction_opened(txid: &str, participants: &[String]) {
	tracing::info!(
		target: TARGET,
		txid,
		participants = ?participants,
		"transaction opened"
	);
}

pub(crate) fn branch_started(txid: &str, participant: &str, branch: &str) {
	tracing::debug!(target: TARGET, txid, participant, branch, "XA branch started");
}

pub(crate) fn transaction_begun(txid: &str) {
	tracing::info!(target: TARGET, txid, "transaction active");
}

pub(crate) fn operation_recorded(txid: &str, participant: &str, operation: &str) {
	tracing::debug!(target: TARGET, txid, participant, operation, "operation executed");
}

pub(crate) fn prepare_vote(txid: &str, participant: &str, ok: bool) {
	if ok {
		tracing::info!(target: TARGET, txid, participant, "prepare vote: yes");
	} else {
		tracing::warn!(target: TARGET, txid, participant, "prepare vote: no");
	}
}

pub(crate) fn transaction_prepared(txid: &str) {
	tracing::info!(target: TARGET, txid, "transaction prepared");
}

pub(crate) fn commit_leg_failed(txid: &str, participant: &str, branch: &str, error: &str) {
	tracing::error!(
		target: TARGET,
		txid,
		participant,
		branch,
		error,
		"commit leg failed; branch left for operator recovery"
	);
}

pub(crate) fn transaction_committed(txid: &str, clean: bool) {
	if clean {
		tracing::info!(target: TARGET, txid, "transaction committed");
	} else {
		tracing::warn!(target: TARGET, txid, "transaction committed with failed legs");
	}
}

pub(crate) fn transaction_aborted(txid: &str) {
	tracing::info!(target: TARGET, txid, "transaction aborted");
}
