//! Participant records
//!
//! A participant is one backend enlisted in a transaction: a loaned session
//! plus the XA branch opened on it. The transaction owns its participants;
//! participants never point back.

use chrono::{DateTime, Utc};
use serde::Serialize;

use xact_backends::Session;

use crate::state::ParticipantState;

pub(crate) struct Participant {
	pub(crate) participant_id: String,
	/// Backend the session was loaned from; diagnostic only, no coordinator
	/// decision branches on it
	pub(crate) backend_id: String,
	pub(crate) branch_id: String,
	pub(crate) state: ParticipantState,
	/// Set once `XA START` succeeds; rollback is a no-op before that
	pub(crate) branch_started: bool,
	pub(crate) last_op_time: DateTime<Utc>,
	pub(crate) session: Option<Box<dyn Session>>,
}

impl Participant {
	pub(crate) fn new(index: usize, txid: &str, session: Box<dyn Session>) -> Self {
		let participant_id = format!("participant_{}", index + 1);
		let branch_id = format!("{txid}_{participant_id}");
		Self {
			backend_id: session.backend_id().to_string(),
			participant_id,
			branch_id,
			state: ParticipantState::Active,
			branch_started: false,
			last_op_time: Utc::now(),
			session: Some(session),
		}
	}

	pub(crate) fn touch(&mut self) {
		self.last_op_time = Utc::now();
	}

	pub(crate) fn status(&self) -> ParticipantStatus {
		ParticipantStatus {
			participant_id: self.participant_id.clone(),
			backend_id: self.backend_id.clone(),
			state: self.state,
			branch_id: self.branch_id.clone(),
			last_op_time: self.last_op_time,
		}
	}
}

/// Read-only participant view inside a status snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct ParticipantStatus {
	pub participant_id: String,
	pub backend_id: String,
	pub state: ParticipantState,
	pub branch_id: String,
	pub last_op_time: DateTime<Utc>,
}
