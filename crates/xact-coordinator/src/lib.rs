//! # xact-coordinator
//!
//! The XA two-phase commit state machine.
//!
//! An [`XaTransaction`] spans one XA branch per backend and drives the
//! protocol phases across them: `begin` starts every branch, caller
//! operations run through [`XaTransaction::execute_operation`], `prepare`
//! collects the votes and `commit` (or `rollback`) finishes. Either every
//! participant's effects become durable, or none do. The one sanctioned
//! exception is a commit-leg failure after a unanimous yes vote, which is
//! reported as a warning and left to operator recovery.
//!
//! The coordinator is a library: no singletons, no background tasks. Build
//! a [`xact_backends::BackendRegistry`], open transactions against it, and
//! shut it down when the process exits.

pub mod error;
pub mod participant;
pub mod state;
pub mod transaction;

mod telemetry;

pub use error::{BoxError, Result, TimeoutScope, TransactionError};
pub use participant::ParticipantStatus;
pub use state::{ParticipantState, TransactionState};
pub use transaction::{
	operation, CommitOutcome, CommitPolicy, OperationFuture, OperationRecord,
	TransactionOptions, TransactionStatus, XaTransaction,
};
