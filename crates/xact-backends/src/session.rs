//! Sessions: live connections capable of speaking the XA dialect
//!
//! A [`Session`] is loaned out by a pool and owned exclusively by one caller
//! (typically one transaction) until released. The trait is object-safe so
//! transaction logic can run against scripted implementations in tests; the
//! production implementation wraps a dedicated `sqlx` MySQL connection.
//!
//! XA statements must be issued through [`Session::raw`]: MySQL rejects the
//! XA verbs in the prepared-statement protocol, so they travel as raw SQL
//! with the branch identifier inlined as a quoted literal.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row as _, TypeInfo};

use crate::error::{BackendError, Result};
use crate::value::{QueryValue, Row};

/// A live connection to one backend.
///
/// Loaned by a pool; released exactly once via [`release`](Session::release).
/// All methods take `&mut self`: a session is never shared between callers.
#[async_trait]
pub trait Session: Send {
	/// Id of the backend this session belongs to.
	fn backend_id(&self) -> &str;

	/// Execute a statement outside the prepared-statement protocol.
	///
	/// This is the path for the XA verbs (`XA START`, `XA END`,
	/// `XA PREPARE`, `XA COMMIT`, `XA ROLLBACK`).
	async fn raw(&mut self, sql: &str) -> Result<()>;

	/// Execute a parameterized statement, returning the affected row count.
	async fn execute(&mut self, sql: &str, params: &[QueryValue]) -> Result<u64>;

	/// Run a parameterized query and collect every row.
	async fn fetch_all(&mut self, sql: &str, params: &[QueryValue]) -> Result<Vec<Row>>;

	/// Run a parameterized query expecting at most one row.
	async fn fetch_optional(&mut self, sql: &str, params: &[QueryValue]) -> Result<Option<Row>>;

	/// Lightweight liveness probe (`SELECT 1`).
	async fn ping(&mut self) -> Result<()>;

	/// Return the session to its owning pool.
	///
	/// `ok = true` makes the underlying connection reusable; `ok = false`
	/// discards it. Consumes the session, so a double release cannot
	/// compile.
	async fn release(self: Box<Self>, ok: bool);
}

/// Quote-escape a branch identifier for inlining into an XA statement.
///
/// MySQL XA identifiers are SQL string literals; embedded single quotes are
/// doubled.
pub fn escape_branch_id(branch_id: &str) -> String {
	branch_id.replace('\'', "''")
}

/// Bind a [`QueryValue`] slice onto a sqlx query.
pub(crate) fn bind_params<'q>(
	mut query: Query<'q, MySql, MySqlArguments>,
	params: &[QueryValue],
) -> Query<'q, MySql, MySqlArguments> {
	for param in params {
		query = match param {
			QueryValue::Null => query.bind(None::<String>),
			QueryValue::Bool(v) => query.bind(*v),
			QueryValue::Int(v) => query.bind(*v),
			QueryValue::Float(v) => query.bind(*v),
			QueryValue::Text(v) => query.bind(v.clone()),
			QueryValue::Bytes(v) => query.bind(v.clone()),
		};
	}
	query
}

/// Convert a driver row into the driver-independent [`Row`].
///
/// Numeric families collapse onto `Int`/`Float`, temporal types are rendered
/// as ISO-8601 text, and anything unrecognized falls back to text then
/// bytes.
pub(crate) fn decode_row(row: &MySqlRow) -> Result<Row> {
	let mut out = Row::new();
	for (index, column) in row.columns().iter().enumerate() {
		let name = column.name().to_string();
		let type_name = column.type_info().name().to_uppercase();
		let value = decode_column(row, index, &type_name)?;
		out.push(name, value);
	}
	Ok(out)
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> Result<QueryValue> {
	let value = match type_name {
		"BOOLEAN" => row
			.try_get::<Option<bool>, _>(index)?
			.map(QueryValue::Bool),
		"TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
			.try_get::<Option<i64>, _>(index)?
			.map(QueryValue::Int),
		"TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
		| "BIGINT UNSIGNED" => row
			.try_get::<Option<u64>, _>(index)?
			.map(|v| QueryValue::Int(v as i64)),
		"FLOAT" | "DOUBLE" => row
			.try_get::<Option<f64>, _>(index)?
			.map(QueryValue::Float),
		"DECIMAL" => row
			.try_get::<Option<rust_decimal::Decimal>, _>(index)?
			.map(|v| match v.to_f64() {
				Some(f) => QueryValue::Float(f),
				None => QueryValue::Text(v.to_string()),
			}),
		"DATETIME" => row
			.try_get::<Option<chrono::NaiveDateTime>, _>(index)?
			.map(|v| QueryValue::Text(v.format("%Y-%m-%d %H:%M:%S").to_string())),
		"TIMESTAMP" => row
			.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
			.map(|v| QueryValue::Text(v.to_rfc3339())),
		"DATE" => row
			.try_get::<Option<chrono::NaiveDate>, _>(index)?
			.map(|v| QueryValue::Text(v.to_string())),
		"TIME" => row
			.try_get::<Option<chrono::NaiveTime>, _>(index)?
			.map(|v| QueryValue::Text(v.to_string())),
		"BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
			.try_get::<Option<Vec<u8>>, _>(index)?
			.map(QueryValue::Bytes),
		_ => match row.try_get::<Option<String>, _>(index) {
			Ok(v) => v.map(QueryValue::Text),
			Err(_) => row
				.try_get::<Option<Vec<u8>>, _>(index)
				.map_err(BackendError::from)?
				.map(QueryValue::Bytes),
		},
	};
	Ok(value.unwrap_or(QueryValue::Null))
}
