//! Prepared-branch recovery data
//!
//! `XA RECOVER` reports branches that were prepared but never finished,
//! e.g. after a commit-phase failure left a participant behind. The row
//! shape is fixed by MySQL: formatID, gtrid_length, bqual_length, data.

use serde::Serialize;

use crate::error::{BackendError, Result};
use crate::value::{QueryValue, Row};

/// One prepared XA branch reported by `XA RECOVER`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct XaBranch {
	pub format_id: i64,
	pub gtrid_length: i64,
	pub bqual_length: i64,
	/// The branch identifier as the coordinator wrote it
	pub branch_id: String,
}

impl XaBranch {
	pub(crate) fn from_recover_row(row: &Row) -> Result<Self> {
		let branch_id = match row.get("data")? {
			QueryValue::Text(v) => v.clone(),
			QueryValue::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
			other => {
				return Err(BackendError::Decode(format!(
					"XA RECOVER data column has unexpected shape: {other:?}"
				)))
			}
		};
		Ok(Self {
			format_id: row.i64("formatID")?,
			gtrid_length: row.i64("gtrid_length")?,
			bqual_length: row.i64("bqual_length")?,
			branch_id,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recover_rows_decode_text_and_binary_data() {
		let text_row = Row::new()
			.with("formatID", QueryValue::Int(1))
			.with("gtrid_length", QueryValue::Int(40))
			.with("bqual_length", QueryValue::Int(0))
			.with("data", QueryValue::Text("tx_participant_1".into()));
		let branch = XaBranch::from_recover_row(&text_row).unwrap();
		assert_eq!(branch.branch_id, "tx_participant_1");
		assert_eq!(branch.format_id, 1);

		let binary_row = Row::new()
			.with("formatID", QueryValue::Int(1))
			.with("gtrid_length", QueryValue::Int(40))
			.with("bqual_length", QueryValue::Int(0))
			.with("data", QueryValue::Bytes(b"tx_participant_2".to_vec()));
		let branch = XaBranch::from_recover_row(&binary_row).unwrap();
		assert_eq!(branch.branch_id, "tx_participant_2");
	}

	#[test]
	fn malformed_recover_row_is_a_decode_error() {
		let row = Row::new().with("formatID", QueryValue::Int(1));
		assert!(XaBranch::from_recover_row(&row).is_err());
	}
}
