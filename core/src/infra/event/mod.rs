//! Event bus for decoupled communication
//!
//! Handlers are registered per [`EventType`]. An emission snapshots the handlers registered for
//! its type, runs them one after the other and collects their failures into a single
//! [`EventBusError`], so a failing handler never prevents the others from running. Every event
//! is also broadcast to [`EventBus::listen`] receivers, which can't fail the emission.

use std::{
	collections::HashMap,
	fmt,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex, PoisonError, Weak,
	},
	time::Duration,
};

use reactor_sync::Operation;

use async_trait::async_trait;
use serde::Serialize;
use strum::{Display, EnumIter};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};
use uuid::Uuid;

use super::{
	job::{JobId, ShutdownStatus},
	stream::StreamKey,
};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
	JobPending,
	JobStarted,
	JobCompleted,
	JobFailed,
	ExecutorStarted,
	ExecutorStopped,
	SyncPending,
	SyncSucceeded,
	SyncFailed,
}

#[derive(Debug, Clone)]
pub enum ReactorEvent {
	JobPending {
		job_id: JobId,
		key: StreamKey,
	},
	JobStarted {
		job_id: JobId,
		key: StreamKey,
		attempt: u32,
	},
	JobCompleted {
		job_id: JobId,
		key: StreamKey,
		operations: Vec<Operation>,
		duration: Duration,
	},
	JobFailed {
		job_id: JobId,
		key: StreamKey,
		error: String,
		will_retry: bool,
		retry_count: u32,
	},
	ExecutorStarted {
		max_concurrency: usize,
	},
	ExecutorStopped {
		status: ShutdownStatus,
	},
	/// A push or pull cycle began, `job_id` is the job whose commit triggered it, if any
	SyncPending {
		sync_id: Uuid,
		job_id: Option<JobId>,
		listener_id: String,
	},
	SyncSucceeded {
		sync_id: Uuid,
		job_id: Option<JobId>,
		listener_id: String,
		operations: usize,
	},
	SyncFailed {
		sync_id: Uuid,
		job_id: Option<JobId>,
		listener_id: String,
		error: String,
	},
}

impl ReactorEvent {
	#[must_use]
	pub const fn event_type(&self) -> EventType {
		match self {
			Self::JobPending { .. } => EventType::JobPending,
			Self::JobStarted { .. } => EventType::JobStarted,
			Self::JobCompleted { .. } => EventType::JobCompleted,
			Self::JobFailed { .. } => EventType::JobFailed,
			Self::ExecutorStarted { .. } => EventType::ExecutorStarted,
			Self::ExecutorStopped { .. } => EventType::ExecutorStopped,
			Self::SyncPending { .. } => EventType::SyncPending,
			Self::SyncSucceeded { .. } => EventType::SyncSucceeded,
			Self::SyncFailed { .. } => EventType::SyncFailed,
		}
	}

	#[must_use]
	pub const fn job_id(&self) -> Option<JobId> {
		match self {
			Self::JobPending { job_id, .. }
			| Self::JobStarted { job_id, .. }
			| Self::JobCompleted { job_id, .. }
			| Self::JobFailed { job_id, .. } => Some(*job_id),
			Self::SyncPending { job_id, .. }
			| Self::SyncSucceeded { job_id, .. }
			| Self::SyncFailed { job_id, .. } => *job_id,
			Self::ExecutorStarted { .. } | Self::ExecutorStopped { .. } => None,
		}
	}
}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
	async fn handle(&self, event: &ReactorEvent) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> EventHandler for F
where
	F: Fn(&ReactorEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
	async fn handle(&self, event: &ReactorEvent) -> Result<(), HandlerError> {
		self(event)
	}
}

/// Every handler failure of a single emission.
#[derive(Debug, Error)]
pub struct EventBusError {
	pub event_type: EventType,
	pub errors: Vec<HandlerError>,
}

impl fmt::Display for EventBusError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} handler(s) failed for {}: ",
			self.errors.len(),
			self.event_type
		)?;

		for (i, e) in self.errors.iter().enumerate() {
			if i > 0 {
				f.write_str("; ")?;
			}
			write!(f, "{e}")?;
		}

		Ok(())
	}
}

type Handlers = HashMap<EventType, Vec<(u64, Arc<dyn EventHandler>)>>;

struct Inner {
	handlers: Mutex<Handlers>,
	next_id: AtomicU64,
	sender: broadcast::Sender<ReactorEvent>,
}

impl Inner {
	fn handlers(&self) -> std::sync::MutexGuard<'_, Handlers> {
		self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[derive(Clone)]
pub struct EventBus {
	inner: Arc<Inner>,
}

impl fmt::Debug for EventBus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventBus")
			.field("handlers", &self.handler_count())
			.field("listeners", &self.inner.sender.receiver_count())
			.finish()
	}
}

impl EventBus {
	/// Create a new event bus, `capacity` bounds the broadcast to [`EventBus::listen`] receivers
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);

		Self {
			inner: Arc::new(Inner {
				handlers: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(0),
				sender,
			}),
		}
	}

	pub fn subscribe(&self, event_type: EventType, handler: impl EventHandler) -> Subscription {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

		self.inner
			.handlers()
			.entry(event_type)
			.or_default()
			.push((id, Arc::new(handler)));

		trace!(%event_type, subscription_id = id, "Handler subscribed");

		Subscription {
			bus: Arc::downgrade(&self.inner),
			event_type,
			id,
			active: AtomicBool::new(true),
		}
	}

	/// Runs every handler subscribed to the event's type, in subscription order.
	pub async fn emit(&self, event: ReactorEvent) -> Result<(), EventBusError> {
		let event_type = event.event_type();

		let handlers = self
			.inner
			.handlers()
			.get(&event_type)
			.map(|handlers| {
				handlers
					.iter()
					.map(|(_, handler)| Arc::clone(handler))
					.collect::<Vec<_>>()
			})
			.unwrap_or_default();

		let mut errors = Vec::new();

		for handler in handlers {
			if let Err(e) = handler.handle(&event).await {
				errors.push(e);
			}
		}

		// No listeners is fine
		let _ = self.inner.sender.send(event);

		if errors.is_empty() {
			trace!(%event_type, "Event emitted");
			Ok(())
		} else {
			error!(%event_type, failed = errors.len(), "Event handlers failed");
			Err(EventBusError { event_type, errors })
		}
	}

	/// Receives every emitted event, regardless of handler outcomes
	#[must_use]
	pub fn listen(&self) -> broadcast::Receiver<ReactorEvent> {
		self.inner.sender.subscribe()
	}

	#[must_use]
	pub fn handler_count(&self) -> usize {
		self.inner.handlers().values().map(Vec::len).sum()
	}

	#[must_use]
	pub fn has_handlers(&self, event_type: EventType) -> bool {
		self.inner.handlers().contains_key(&event_type)
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it keeps the handler registered, call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
	bus: Weak<Inner>,
	event_type: EventType,
	id: u64,
	active: AtomicBool,
}

impl Subscription {
	/// Removes the handler, calling it again does nothing.
	pub fn unsubscribe(&self) {
		if !self.active.swap(false, Ordering::AcqRel) {
			return;
		}

		let Some(inner) = self.bus.upgrade() else {
			return;
		};

		let mut handlers = inner.handlers();
		if let Some(registered) = handlers.get_mut(&self.event_type) {
			registered.retain(|(id, _)| *id != self.id);
			if registered.is_empty() {
				handlers.remove(&self.event_type);
			}
		}

		debug!(event_type = %self.event_type, subscription_id = self.id, "Handler unsubscribed");
	}

	#[must_use]
	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	fn executor_started() -> ReactorEvent {
		ReactorEvent::ExecutorStarted { max_concurrency: 1 }
	}

	fn counter(calls: &Arc<AtomicUsize>) -> impl EventHandler {
		let calls = Arc::clone(calls);
		move |_: &ReactorEvent| -> Result<(), HandlerError> {
			calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	#[tokio::test]
	async fn failing_handler_does_not_stop_the_others() {
		let bus = EventBus::default();
		let calls = Arc::new(AtomicUsize::new(0));

		bus.subscribe(EventType::ExecutorStarted, counter(&calls));
		bus.subscribe(EventType::ExecutorStarted, {
			let calls = Arc::clone(&calls);
			move |_: &ReactorEvent| -> Result<(), HandlerError> {
				calls.fetch_add(1, Ordering::SeqCst);
				Err("handler exploded".into())
			}
		});
		bus.subscribe(EventType::ExecutorStarted, counter(&calls));

		let err = bus
			.emit(executor_started())
			.await
			.expect_err("one handler failed");

		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert_eq!(err.errors.len(), 1);
		assert_eq!(err.event_type, EventType::ExecutorStarted);
		assert!(err.to_string().contains("handler exploded"));
	}

	#[tokio::test]
	async fn only_matching_type_is_dispatched() {
		let bus = EventBus::default();
		let calls = Arc::new(AtomicUsize::new(0));

		bus.subscribe(EventType::JobCompleted, counter(&calls));

		bus.emit(executor_started()).await.expect("no handlers");
		assert_eq!(calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn unsubscribe_is_idempotent_and_drops_empty_registrations() {
		let bus = EventBus::default();
		let calls = Arc::new(AtomicUsize::new(0));

		let first = bus.subscribe(EventType::ExecutorStarted, counter(&calls));
		let second = bus.subscribe(EventType::ExecutorStarted, counter(&calls));

		first.unsubscribe();
		first.unsubscribe();
		assert!(!first.is_active());
		assert_eq!(bus.handler_count(), 1);

		bus.emit(executor_started()).await.expect("emit");
		assert_eq!(calls.load(Ordering::SeqCst), 1);

		second.unsubscribe();
		assert!(!bus.has_handlers(EventType::ExecutorStarted));
	}

	#[tokio::test]
	async fn handlers_added_during_emission_wait_for_the_next_one() {
		let bus = EventBus::default();
		let calls = Arc::new(AtomicUsize::new(0));

		bus.subscribe(EventType::ExecutorStarted, {
			let bus = bus.clone();
			let calls = Arc::clone(&calls);
			move |_: &ReactorEvent| -> Result<(), HandlerError> {
				bus.subscribe(EventType::ExecutorStarted, counter(&calls));
				Ok(())
			}
		});

		bus.emit(executor_started()).await.expect("emit");
		assert_eq!(calls.load(Ordering::SeqCst), 0);

		bus.emit(executor_started()).await.expect("emit");
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn listeners_receive_every_event() {
		let bus = EventBus::default();
		let mut listener = bus.listen();

		bus.emit(executor_started()).await.expect("emit");

		let event = listener.recv().await.expect("event");
		assert_eq!(event.event_type(), EventType::ExecutorStarted);
		assert_eq!(EventType::JobFailed.to_string(), "JOB_FAILED");
	}
}
