//! Parameter values and result rows
//!
//! Caller operations bind parameters and read results through a small value
//! layer instead of driver types, so transaction logic and its tests do not
//! depend on a live connection. The MySQL session converts both directions.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{BackendError, Result};

/// A single bind parameter or column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Text(String),
	Bytes(Vec<u8>),
}

impl From<bool> for QueryValue {
	fn from(v: bool) -> Self {
		QueryValue::Bool(v)
	}
}

impl From<i32> for QueryValue {
	fn from(v: i32) -> Self {
		QueryValue::Int(v.into())
	}
}

impl From<i64> for QueryValue {
	fn from(v: i64) -> Self {
		QueryValue::Int(v)
	}
}

impl From<f64> for QueryValue {
	fn from(v: f64) -> Self {
		QueryValue::Float(v)
	}
}

impl From<&str> for QueryValue {
	fn from(v: &str) -> Self {
		QueryValue::Text(v.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(v: String) -> Self {
		QueryValue::Text(v)
	}
}

impl<T> From<Option<T>> for QueryValue
where
	T: Into<QueryValue>,
{
	fn from(v: Option<T>) -> Self {
		match v {
			Some(inner) => inner.into(),
			None => QueryValue::Null,
		}
	}
}

/// One result row, indexed by column name in select order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Row {
	columns: IndexMap<String, QueryValue>,
}

impl Row {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a column. Used by drivers and by test fixtures building
	/// canned results.
	pub fn push(&mut self, name: impl Into<String>, value: QueryValue) {
		self.columns.insert(name.into(), value);
	}

	/// Builder-style variant of [`push`](Self::push).
	pub fn with(mut self, name: impl Into<String>, value: QueryValue) -> Self {
		self.push(name, value);
		self
	}

	pub fn len(&self) -> usize {
		self.columns.len()
	}

	pub fn is_empty(&self) -> bool {
		self.columns.is_empty()
	}

	/// Raw value by column name.
	pub fn get(&self, column: &str) -> Result<&QueryValue> {
		self.columns
			.get(column)
			.ok_or_else(|| BackendError::Decode(format!("column not found: {column}")))
	}

	/// Integer column; `Bool` widens, everything else is a decode error.
	pub fn i64(&self, column: &str) -> Result<i64> {
		match self.get(column)? {
			QueryValue::Int(v) => Ok(*v),
			QueryValue::Bool(v) => Ok(i64::from(*v)),
			other => Err(type_error(column, "integer", other)),
		}
	}

	/// Floating-point column; integer columns widen.
	pub fn f64(&self, column: &str) -> Result<f64> {
		match self.get(column)? {
			QueryValue::Float(v) => Ok(*v),
			QueryValue::Int(v) => Ok(*v as f64),
			other => Err(type_error(column, "float", other)),
		}
	}

	/// Text column.
	pub fn text(&self, column: &str) -> Result<&str> {
		match self.get(column)? {
			QueryValue::Text(v) => Ok(v.as_str()),
			other => Err(type_error(column, "text", other)),
		}
	}

	/// `true` when the column is present and SQL NULL.
	pub fn is_null(&self, column: &str) -> bool {
		matches!(self.columns.get(column), Some(QueryValue::Null))
	}
}

fn type_error(column: &str, expected: &str, got: &QueryValue) -> BackendError {
	BackendError::Decode(format!("column '{column}': expected {expected}, got {got:?}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn typed_getters_coerce_where_safe() {
		let row = Row::new()
			.with("id", QueryValue::Int(7))
			.with("balance", QueryValue::Float(4500.0))
			.with("name", QueryValue::Text("alice".into()))
			.with("flag", QueryValue::Bool(true));

		assert_eq!(row.i64("id").unwrap(), 7);
		assert_eq!(row.f64("id").unwrap(), 7.0);
		assert_eq!(row.f64("balance").unwrap(), 4500.0);
		assert_eq!(row.text("name").unwrap(), "alice");
		assert_eq!(row.i64("flag").unwrap(), 1);
	}

	#[test]
	fn missing_and_mismatched_columns_are_decode_errors() {
		let row = Row::new().with("name", QueryValue::Text("bob".into()));

		assert!(matches!(row.i64("name"), Err(BackendError::Decode(_))));
		assert!(matches!(row.get("absent"), Err(BackendError::Decode(_))));
	}

	#[test]
	fn option_params_collapse_to_null() {
		assert_eq!(QueryValue::from(None::<i64>), QueryValue::Null);
		assert_eq!(QueryValue::from(Some(3_i64)), QueryValue::Int(3));
	}
}
