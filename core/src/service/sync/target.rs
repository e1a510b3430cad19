use reactor_sync::Operation;

use async_trait::async_trait;

use super::SyncError;

/// Transport delivering pushed operations to one listener.
#[async_trait]
pub trait SyncTarget: Send + Sync + 'static {
	async fn push(&self, operations: &[Operation]) -> Result<(), SyncError>;
}

/// In-process target, every push becomes one message on a channel.
#[derive(Debug, Clone)]
pub struct ChannelTarget {
	tx: async_channel::Sender<Vec<Operation>>,
}

impl ChannelTarget {
	/// Pushes wait while `capacity` batches are undelivered.
	#[must_use]
	pub fn bounded(capacity: usize) -> (Self, async_channel::Receiver<Vec<Operation>>) {
		let (tx, rx) = async_channel::bounded(capacity.max(1));
		(Self { tx }, rx)
	}

	#[must_use]
	pub fn unbounded() -> (Self, async_channel::Receiver<Vec<Operation>>) {
		let (tx, rx) = async_channel::unbounded();
		(Self { tx }, rx)
	}
}

#[async_trait]
impl SyncTarget for ChannelTarget {
	async fn push(&self, operations: &[Operation]) -> Result<(), SyncError> {
		self.tx
			.send(operations.to_vec())
			.await
			.map_err(|_| SyncError::Transport("channel closed".to_string()))
	}
}
