use reactor_sync::{Action, Signature};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("failed to sign action <id='{action_id}'>: {reason}")]
pub struct SignerError {
	pub action_id: Uuid,
	pub reason: String,
}

/// Produces the signature attached to an action before it enters the pipeline.
#[async_trait]
pub trait Signer: Send + Sync + 'static {
	async fn sign(&self, action: &Action) -> Result<Signature, SignerError>;
}

/// Signs actions with a keyed blake3 hash over their serialized form.
///
/// Only proves that the holder of `key` produced the action, there is no public key to verify
/// against.
#[derive(Clone)]
pub struct KeyedHashSigner {
	signer: String,
	key: [u8; blake3::KEY_LEN],
}

impl std::fmt::Debug for KeyedHashSigner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyedHashSigner")
			.field("signer", &self.signer)
			.finish_non_exhaustive()
	}
}

impl KeyedHashSigner {
	pub fn new(signer: impl Into<String>, key: [u8; blake3::KEY_LEN]) -> Self {
		Self {
			signer: signer.into(),
			key,
		}
	}

	fn digest(&self, action: &Action) -> Result<String, SignerError> {
		// signatures are not part of what gets signed
		let unsigned = Action {
			signatures: Vec::new(),
			..action.clone()
		};

		let bytes = serde_json::to_vec(&unsigned).map_err(|e| SignerError {
			action_id: action.id,
			reason: e.to_string(),
		})?;

		Ok(blake3::keyed_hash(&self.key, &bytes).to_hex().to_string())
	}

	/// Whether `signature` was produced by this signer for `action`.
	#[must_use]
	pub fn verify(&self, action: &Action, signature: &Signature) -> bool {
		signature.signer == self.signer
			&& self
				.digest(action)
				.is_ok_and(|digest| digest == signature.value)
	}
}

#[async_trait]
impl Signer for KeyedHashSigner {
	async fn sign(&self, action: &Action) -> Result<Signature, SignerError> {
		Ok(Signature {
			signer: self.signer.clone(),
			value: self.digest(action)?,
		})
	}
}
