//! # xact
//!
//! A distributed transaction coordinator for MySQL-compatible backends,
//! built on the XA two-phase commit protocol. Either every participant's
//! effects become durable, or none do.
//!
//! This crate is the facade over the workspace members:
//!
//! - [`conf`]: environment-derived settings
//! - [`backends`]: sessions, bounded pools, the backend registry and
//!   prepared-branch recovery tooling
//! - [`coordinator`]: the 2PC state machine and operation executor
//!
//! ## Quick start
//!
//! ```no_run
//! use xact::{operation, BackendRegistry, Session, Settings, TransactionOptions, XaTransaction};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env()?;
//! let registry = BackendRegistry::from_settings(&settings);
//!
//! let tx = XaTransaction::open(&registry, TransactionOptions::default()).await?;
//! tx.begin().await?;
//!
//! let result = async {
//! 	tx.execute_operation(
//! 		"participant_1",
//! 		"debit",
//! 		operation(|session| {
//! 			Box::pin(async move {
//! 				session
//! 					.execute(
//! 						"UPDATE accounts SET balance = balance - ? WHERE id = ?",
//! 						&[500.0.into(), 1001_i64.into()],
//! 					)
//! 					.await?;
//! 				Ok(())
//! 			})
//! 		}),
//! 	)
//! 	.await?;
//! 	tx.prepare().await?;
//! 	tx.commit().await
//! }
//! .await;
//!
//! if result.is_err() {
//! 	tx.rollback().await?;
//! }
//! tx.cleanup().await;
//!
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use xact_backends as backends;
pub use xact_conf as conf;
pub use xact_coordinator as coordinator;

pub use xact_backends::{
	BackendError, BackendRegistry, BackendStatus, ConnectionPool, PoolConfig, QueryValue, Row,
	Session, XaBranch,
};
pub use xact_conf::{BackendSettings, CoordinatorSettings, Settings, SettingsError};
pub use xact_coordinator::{
	operation, BoxError, CommitOutcome, CommitPolicy, OperationRecord, ParticipantState,
	ParticipantStatus, TimeoutScope, TransactionError, TransactionOptions, TransactionState,
	TransactionStatus, XaTransaction,
};
