//! Call/await surface over the asynchronous reactor pipeline

use std::{fmt, sync::Arc};

use reactor_sync::{Action, Operation};

use thiserror::Error;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
	domain::Signer,
	error::{Error, Result},
	infra::{
		event::{EventBus, EventType, HandlerError, ReactorEvent, Subscription},
		job::{JobAwaiter, JobInfo, JobStatus, JobTracker},
		store::ListenerFilter,
		stream::StreamKey,
	},
	reactor::Reactor,
};

#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("a reactor is required to build a client")]
	MissingReactor,
	#[error("a signer is required to build a client")]
	MissingSigner,
	#[error("the reactor has no document model registered")]
	NoDocumentModels,
}

/// Delivers committed operations to in-process subscribers.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
	events: EventBus,
}

impl SubscriptionManager {
	#[must_use]
	pub const fn new(events: EventBus) -> Self {
		Self { events }
	}

	/// Calls `handler` with the operations of every completed job that match `filter`.
	pub fn subscribe<F>(&self, filter: ListenerFilter, handler: F) -> Subscription
	where
		F: Fn(&[Operation]) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
	{
		self.events
			.subscribe(EventType::JobCompleted, move |event: &ReactorEvent| {
				let ReactorEvent::JobCompleted { operations, .. } = event else {
					return Ok(());
				};

				let matching = matching(&filter, operations);
				if matching.is_empty() {
					Ok(())
				} else {
					handler(&matching)
				}
			})
	}

	/// Stream of the committed operations matching `filter`, one item per completed job.
	///
	/// Receivers lagging behind the event bus capacity skip the batches they missed.
	pub fn stream(&self, filter: ListenerFilter) -> impl Stream<Item = Vec<Operation>> {
		BroadcastStream::new(self.events.listen()).filter_map(move |event| match event {
			Ok(ReactorEvent::JobCompleted { operations, .. }) => {
				Some(matching(&filter, &operations)).filter(|matching| !matching.is_empty())
			}
			_ => None,
		})
	}
}

fn matching(filter: &ListenerFilter, operations: &[Operation]) -> Vec<Operation> {
	operations
		.iter()
		.filter(|op| filter.matches(&StreamKey::of(op), &op.document_type))
		.cloned()
		.collect()
}

#[derive(Default)]
pub struct ReactorClientBuilder {
	reactor: Option<Arc<Reactor>>,
	signer: Option<Arc<dyn Signer>>,
	subscriptions: Option<SubscriptionManager>,
	awaiter: Option<Arc<dyn JobAwaiter>>,
}

impl fmt::Debug for ReactorClientBuilder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReactorClientBuilder")
			.field("reactor", &self.reactor.is_some())
			.field("signer", &self.signer.is_some())
			.field("subscriptions", &self.subscriptions.is_some())
			.field("awaiter", &self.awaiter.is_some())
			.finish()
	}
}

impl ReactorClientBuilder {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_reactor(mut self, reactor: Arc<Reactor>) -> Self {
		self.reactor = Some(reactor);
		self
	}

	#[must_use]
	pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
		self.signer = Some(signer);
		self
	}

	#[must_use]
	pub fn with_subscription_manager(mut self, subscriptions: SubscriptionManager) -> Self {
		self.subscriptions = Some(subscriptions);
		self
	}

	#[must_use]
	pub fn with_job_awaiter(mut self, awaiter: Arc<dyn JobAwaiter>) -> Self {
		self.awaiter = Some(awaiter);
		self
	}

	/// The subscription manager and job awaiter default to the reactor's own.
	pub fn build(self) -> std::result::Result<ReactorClient, BuilderError> {
		let reactor = self.reactor.ok_or(BuilderError::MissingReactor)?;
		let signer = self.signer.ok_or(BuilderError::MissingSigner)?;

		if reactor.registry().document_types().is_empty() {
			return Err(BuilderError::NoDocumentModels);
		}

		let subscriptions = self
			.subscriptions
			.unwrap_or_else(|| SubscriptionManager::new(reactor.events().clone()));
		let awaiter: Arc<dyn JobAwaiter> = match self.awaiter {
			Some(awaiter) => awaiter,
			None => Arc::<JobTracker>::clone(reactor.tracker()),
		};

		Ok(ReactorClient {
			reactor,
			signer,
			subscriptions,
			awaiter,
		})
	}
}

#[derive(Clone)]
pub struct ReactorClient {
	reactor: Arc<Reactor>,
	signer: Arc<dyn Signer>,
	subscriptions: SubscriptionManager,
	awaiter: Arc<dyn JobAwaiter>,
}

impl fmt::Debug for ReactorClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReactorClient")
			.field("reactor", &self.reactor)
			.finish_non_exhaustive()
	}
}

impl ReactorClient {
	#[must_use]
	pub fn builder() -> ReactorClientBuilder {
		ReactorClientBuilder::new()
	}

	#[must_use]
	pub const fn reactor(&self) -> &Arc<Reactor> {
		&self.reactor
	}

	/// Signs `actions` and queues them, returning as soon as the job is admitted.
	pub async fn execute(
		&self,
		document_type: &str,
		document_id: &str,
		branch: &str,
		mut actions: Vec<Action>,
	) -> Result<JobInfo> {
		for action in &mut actions {
			let signature = self.signer.sign(action).await?;
			action.signatures.push(signature);
		}

		self.reactor
			.execute(document_type, document_id, branch, actions)
			.await
	}

	/// Like [`ReactorClient::execute`], then waits for the job to finish and returns the
	/// operations it committed.
	pub async fn execute_and_wait(
		&self,
		document_type: &str,
		document_id: &str,
		branch: &str,
		actions: Vec<Action>,
		cancel: Option<&CancellationToken>,
	) -> Result<Vec<Operation>> {
		let job = self
			.execute(document_type, document_id, branch, actions)
			.await?;

		let info = self.awaiter.wait_for_job(job.id, cancel).await?;

		debug!(job_id = %info.id, status = %info.status, "Awaited job");

		match info.status {
			JobStatus::Completed => Ok(info.operations),
			_ => Err(Error::JobFailed {
				job_id: info.id,
				error: info.error.unwrap_or_else(|| info.status.to_string()),
			}),
		}
	}

	pub fn subscribe<F>(&self, filter: ListenerFilter, handler: F) -> Subscription
	where
		F: Fn(&[Operation]) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
	{
		self.subscriptions.subscribe(filter, handler)
	}

	pub fn stream(&self, filter: ListenerFilter) -> impl Stream<Item = Vec<Operation>> {
		self.subscriptions.stream(filter)
	}
}
