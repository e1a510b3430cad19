use thiserror::Error;

/// A stored integer does not fit the domain type.
#[derive(Error, Debug)]
#[error("corrupted {field} in database: {value}")]
pub struct CorruptedFieldError {
	pub field: &'static str,
	pub value: i64,
}

/// Converts a stored `BIGINT` back into a revision, index or skip count.
pub fn u64_from_db(field: &'static str, value: i64) -> Result<u64, CorruptedFieldError> {
	u64::try_from(value).map_err(|_| CorruptedFieldError { field, value })
}

/// SQLite only has signed 64 bit integers, anything past `i64::MAX` saturates.
#[must_use]
pub fn u64_to_db(value: u64) -> i64 {
	i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn negative_values_are_corrupted() {
		assert_eq!(u64_from_db("index", 42).ok(), Some(42));

		let err = u64_from_db("index", -1).expect_err("negative index");
		assert_eq!(err.to_string(), "corrupted index in database: -1");
	}

	#[test]
	fn oversized_values_saturate() {
		assert_eq!(u64_to_db(7), 7);
		assert_eq!(u64_to_db(u64::MAX), i64::MAX);
	}
}
