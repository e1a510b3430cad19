use thiserror::Error;

use super::operation::OpId;

#[derive(Debug, Error)]
pub enum Error {
	#[error("broken hash chain at index {index}: expected previous <id='{expected}'>, found <id='{found}'>")]
	BrokenChain {
		index: u64,
		expected: String,
		found: String,
	},
	#[error("operation at index {index} does not match its derived id <id='{op_id}'>")]
	Tampered { index: u64, op_id: OpId },
	#[error("conflicting operations at index {index} with skip {skip}")]
	Conflict { index: u64, skip: u64 },
}
