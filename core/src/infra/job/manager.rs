use std::{
	pin::pin,
	sync::{
		atomic::{AtomicU64, AtomicUsize, Ordering},
		Arc, Mutex, PoisonError,
	},
	time::Instant,
};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
	config::ExecutorConfig,
	infra::{
		event::{EventBus, ReactorEvent},
		queue::Queue,
	},
};

use super::{
	Executor, ExecutorStats, Job, JobAwaiter, JobError, JobId, JobInfo, JobTracker,
	ShutdownStatus,
};

#[derive(Debug, Default)]
struct Counters {
	running: AtomicUsize,
	completed: AtomicU64,
	failed: AtomicU64,
	retried: AtomicU64,
}

/// Everything a worker needs, shared by all of them.
struct Shared {
	config: ExecutorConfig,
	queue: Arc<dyn Queue>,
	executor: Arc<dyn Executor>,
	events: EventBus,
	tracker: Arc<JobTracker>,
	counters: Counters,
	/// Stops workers from picking new jobs
	stopping: CancellationToken,
	/// Cancels the jobs still running
	abort: CancellationToken,
}

/// Coordinates a pool of workers draining the job queue.
pub struct ExecutorManager {
	shared: Arc<Shared>,
	workers: Mutex<Option<JoinSet<()>>>,
}

impl std::fmt::Debug for ExecutorManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExecutorManager")
			.field("config", &self.shared.config)
			.field("stats", &self.stats())
			.finish_non_exhaustive()
	}
}

impl ExecutorManager {
	pub fn new(
		config: ExecutorConfig,
		queue: Arc<dyn Queue>,
		executor: Arc<dyn Executor>,
		events: EventBus,
		tracker: Arc<JobTracker>,
	) -> Self {
		Self {
			shared: Arc::new(Shared {
				config,
				queue,
				executor,
				events,
				tracker,
				counters: Counters::default(),
				stopping: CancellationToken::new(),
				abort: CancellationToken::new(),
			}),
			workers: Mutex::new(None),
		}
	}

	#[must_use]
	pub fn config(&self) -> &ExecutorConfig {
		&self.shared.config
	}

	#[must_use]
	pub fn tracker(&self) -> &Arc<JobTracker> {
		&self.shared.tracker
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.workers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.is_some()
	}

	/// Admits a job to the queue and starts tracking it.
	pub async fn submit(&self, job: Job) -> Result<JobInfo, JobError> {
		let info = self.shared.tracker.register(&job);

		// emitted first so JOB_PENDING always precedes JOB_STARTED
		self.shared
			.emit(ReactorEvent::JobPending {
				job_id: job.id,
				key: job.key.clone(),
			})
			.await;

		let (job_id, key) = (job.id, job.key.clone());
		if let Err(e) = self.shared.queue.enqueue(job) {
			let e = JobError::from(e);
			self.shared.tracker.fail(job_id, e.to_string());
			self.shared
				.emit(ReactorEvent::JobFailed {
					job_id,
					key,
					error: e.to_string(),
					will_retry: false,
					retry_count: 0,
				})
				.await;
			return Err(e);
		}

		debug!(%job_id, %key, "Job submitted");

		Ok(info)
	}

	/// Spawns `max_concurrency` workers, does nothing if they are already running.
	pub async fn start(&self) {
		let max_concurrency = self.shared.config.max_concurrency.max(1);

		{
			let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
			if workers.is_some() {
				warn!("Executor manager already started");
				return;
			}

			let mut set = JoinSet::new();
			for worker_id in 0..max_concurrency {
				set.spawn(Arc::clone(&self.shared).work(worker_id));
			}
			*workers = Some(set);
		}

		info!(max_concurrency, "Executor manager started");
		self.shared
			.emit(ReactorEvent::ExecutorStarted { max_concurrency })
			.await;
	}

	/// Stops accepting jobs and gives running ones the configured grace period before cancelling
	/// them. Jobs still pending stay in the queue.
	pub async fn stop(&self) -> ShutdownStatus {
		let workers = self
			.workers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();

		let Some(mut workers) = workers else {
			warn!("Executor manager stopped while not running");
			return ShutdownStatus::Graceful;
		};

		self.shared.queue.block();
		self.shared.stopping.cancel();

		let grace = self.shared.config.shutdown_grace();
		let drained = tokio::time::timeout(grace, async {
			while workers.join_next().await.is_some() {}
		})
		.await
		.is_ok();

		let status = if drained {
			ShutdownStatus::Graceful
		} else {
			let aborted_jobs = self.shared.counters.running.load(Ordering::Acquire);
			warn!(aborted_jobs, ?grace, "Grace period elapsed, cancelling running jobs");

			self.shared.abort.cancel();
			while workers.join_next().await.is_some() {}

			ShutdownStatus::Forced { aborted_jobs }
		};

		info!(?status, "Executor manager stopped");
		self.shared
			.emit(ReactorEvent::ExecutorStopped { status })
			.await;

		status
	}

	#[must_use]
	pub fn stats(&self) -> ExecutorStats {
		let counters = &self.shared.counters;

		ExecutorStats {
			running: counters.running.load(Ordering::Acquire),
			pending: self.shared.queue.pending_jobs().len(),
			completed: counters.completed.load(Ordering::Relaxed),
			failed: counters.failed.load(Ordering::Relaxed),
			retried: counters.retried.load(Ordering::Relaxed),
		}
	}
}

#[async_trait]
impl JobAwaiter for ExecutorManager {
	async fn wait_for_job(
		&self,
		job_id: JobId,
		cancel: Option<&CancellationToken>,
	) -> Result<JobInfo, JobError> {
		self.shared.tracker.wait_for_job(job_id, cancel).await
	}
}

impl Shared {
	async fn emit(&self, event: ReactorEvent) {
		if let Err(e) = self.events.emit(event).await {
			warn!(%e, "Event handlers failed");
		}
	}

	async fn work(self: Arc<Self>, worker_id: usize) {
		let notify = self.queue.notifier();

		debug!(worker_id, "Worker started");

		loop {
			let mut notified = pin!(notify.notified());
			notified.as_mut().enable();

			if self.stopping.is_cancelled() {
				break;
			}

			if let Some(job) = self.queue.dequeue_next() {
				self.run(job).await;
				continue;
			}

			tokio::select! {
				() = self.stopping.cancelled() => break,
				() = notified => {}
			}
		}

		debug!(worker_id, "Worker stopped");
	}

	/// Runs `job` until it completes or fails for good. Retries happen in place so the job keeps
	/// its key reserved and no later job of the same stream can overtake it.
	async fn run(&self, mut job: Job) {
		let started_at = Instant::now();
		let timeout = self.config.job_timeout();

		self.counters.running.fetch_add(1, Ordering::AcqRel);

		loop {
			let attempt = job.retry_count + 1;
			self.tracker.start(job.id, attempt);
			debug!(job_id = %job.id, key = %job.key, attempt, "Job started");
			self.emit(ReactorEvent::JobStarted {
				job_id: job.id,
				key: job.key.clone(),
				attempt,
			})
			.await;

			let res = tokio::select! {
				biased;
				() = self.abort.cancelled() => Err(JobError::Cancelled),
				res = tokio::time::timeout(timeout, self.executor.execute(&job, &self.abort)) => {
					res.unwrap_or_else(|_| Err(JobError::Timeout(timeout)))
				}
			};

			match res {
				Ok(operations) => {
					tokio::select! {
						biased;
						() = self.abort.cancelled() => {}
						() = self.executor.after_commit(&job, &operations) => {}
					}

					let duration = started_at.elapsed();

					self.queue.complete(job.id);
					self.counters.completed.fetch_add(1, Ordering::Relaxed);

					info!(
						job_id = %job.id,
						key = %job.key,
						operations = operations.len(),
						?duration,
						"Job completed",
					);
					// awaiters resolve only once every handler has seen the operations
					self.emit(ReactorEvent::JobCompleted {
						job_id: job.id,
						key: job.key.clone(),
						operations: operations.clone(),
						duration,
					})
					.await;
					self.tracker.complete(job.id, operations);

					break;
				}

				Err(e) if e.is_retryable() && job.retry_count < self.config.max_retries => {
					job.retry_count += 1;
					job.error_history.push(e.to_string());
					self.counters.retried.fetch_add(1, Ordering::Relaxed);
					self.tracker.retrying(job.id, e.to_string());

					let delay = self.config.retry_delay(job.retry_count);
					warn!(
						job_id = %job.id,
						key = %job.key,
						retry_count = job.retry_count,
						?delay,
						%e,
						"Job attempt failed, retrying",
					);
					self.emit(ReactorEvent::JobFailed {
						job_id: job.id,
						key: job.key.clone(),
						error: e.to_string(),
						will_retry: true,
						retry_count: job.retry_count,
					})
					.await;

					tokio::select! {
						() = self.abort.cancelled() => {
							self.fail(&job, &JobError::Cancelled).await;
							break;
						}
						() = tokio::time::sleep(delay) => {}
					}
				}

				Err(e) => {
					self.fail(&job, &e).await;
					break;
				}
			}
		}

		self.counters.running.fetch_sub(1, Ordering::AcqRel);
	}

	async fn fail(&self, job: &Job, e: &JobError) {
		self.queue.fail(job.id, &e.to_string());
		self.counters.failed.fetch_add(1, Ordering::Relaxed);

		error!(
			job_id = %job.id,
			key = %job.key,
			retry_count = job.retry_count,
			%e,
			"Job failed",
		);
		self.emit(ReactorEvent::JobFailed {
			job_id: job.id,
			key: job.key.clone(),
			error: e.to_string(),
			will_retry: false,
			retry_count: job.retry_count,
		})
		.await;
		self.tracker.fail(job.id, e.to_string());
	}
}

#[cfg(test)]
mod tests {
	use std::{sync::atomic::AtomicU32, time::Duration};

	use reactor_sync::{Action, Operation};

	use serde_json::json;
	use tokio::time::Instant as TokioInstant;

	use crate::{
		domain::ReducerError,
		infra::{
			event::{EventType, HandlerError},
			queue::JobQueue,
			stream::StreamKey,
		},
	};

	use super::{super::JobStatus, *};

	enum Behavior {
		FailTransient,
		Sleep(Duration),
		SlowFollowUp(Duration),
		Succeed,
	}

	struct MockExecutor {
		behavior: Behavior,
		attempts: AtomicU32,
		order: Mutex<Vec<JobId>>,
		running: AtomicUsize,
		max_running: AtomicUsize,
	}

	impl MockExecutor {
		fn new(behavior: Behavior) -> Arc<Self> {
			Arc::new(Self {
				behavior,
				attempts: AtomicU32::new(0),
				order: Mutex::new(Vec::new()),
				running: AtomicUsize::new(0),
				max_running: AtomicUsize::new(0),
			})
		}
	}

	#[async_trait]
	impl Executor for MockExecutor {
		async fn execute(
			&self,
			job: &Job,
			_cancel: &CancellationToken,
		) -> Result<Vec<Operation>, JobError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_running.fetch_max(running, Ordering::SeqCst);

			let res = match self.behavior {
				Behavior::FailTransient => Err(ReducerError::Transient("busy".into()).into()),
				Behavior::Sleep(duration) => {
					tokio::time::sleep(duration).await;
					Ok(Vec::new())
				}
				Behavior::Succeed | Behavior::SlowFollowUp(_) => {
					tokio::task::yield_now().await;
					Ok(Vec::new())
				}
			};

			self.order
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.push(job.id);
			self.running.fetch_sub(1, Ordering::SeqCst);

			res
		}

		async fn after_commit(&self, _job: &Job, _operations: &[Operation]) {
			if let Behavior::SlowFollowUp(duration) = self.behavior {
				tokio::time::sleep(duration).await;
			}
		}
	}

	fn job() -> Job {
		Job::new(
			StreamKey::new("doc-1", "global", "main"),
			"test/counter",
			vec![Action::new("INCREMENT", "global", json!({}))],
		)
	}

	fn manager(config: ExecutorConfig, executor: Arc<MockExecutor>) -> ExecutorManager {
		ExecutorManager::new(
			config,
			Arc::new(JobQueue::new()),
			executor,
			EventBus::default(),
			Arc::new(JobTracker::new()),
		)
	}

	#[tokio::test(start_paused = true)]
	async fn transient_failures_retry_with_capped_backoff() {
		let executor = MockExecutor::new(Behavior::FailTransient);
		let manager = manager(
			ExecutorConfig {
				retry_base_delay_ms: 100,
				retry_max_delay_ms: 250,
				max_retries: 3,
				..Default::default()
			},
			Arc::clone(&executor),
		);

		let starts = Arc::new(Mutex::new(Vec::new()));
		let failures = Arc::new(Mutex::new(Vec::new()));

		let _started = manager.shared.events.subscribe(EventType::JobStarted, {
			let starts = Arc::clone(&starts);
			move |_: &ReactorEvent| -> Result<(), HandlerError> {
				starts.lock().expect("lock").push(TokioInstant::now());
				Ok(())
			}
		});
		let _failed = manager.shared.events.subscribe(EventType::JobFailed, {
			let failures = Arc::clone(&failures);
			move |event: &ReactorEvent| -> Result<(), HandlerError> {
				if let ReactorEvent::JobFailed {
					will_retry,
					retry_count,
					..
				} = event
				{
					failures.lock().expect("lock").push((*will_retry, *retry_count));
				}
				Ok(())
			}
		});

		let info = manager.submit(job()).await.expect("submitted");
		manager.start().await;

		let info = manager.wait_for_job(info.id, None).await.expect("terminal");
		assert_eq!(info.status, JobStatus::Failed);
		assert_eq!(info.attempts, 4);
		assert_eq!(executor.attempts.load(Ordering::SeqCst), 4);

		assert_eq!(
			*failures.lock().expect("lock"),
			vec![(true, 1), (true, 2), (true, 3), (false, 3)]
		);

		let starts = starts.lock().expect("lock").clone();
		let gaps = starts
			.windows(2)
			.map(|pair| pair[1] - pair[0])
			.collect::<Vec<_>>();
		assert_eq!(
			gaps,
			vec![
				Duration::from_millis(100),
				Duration::from_millis(200),
				Duration::from_millis(250)
			]
		);

		let stats = manager.stats();
		assert_eq!((stats.failed, stats.retried, stats.completed), (1, 3, 0));

		assert!(manager.stop().await.is_graceful());
	}

	#[tokio::test(start_paused = true)]
	async fn timeouts_are_retried_then_fail() {
		let executor = MockExecutor::new(Behavior::Sleep(Duration::from_secs(3_600)));
		let manager = manager(
			ExecutorConfig {
				job_timeout_ms: 50,
				max_retries: 1,
				..Default::default()
			},
			Arc::clone(&executor),
		);

		let info = manager.submit(job()).await.expect("submitted");
		manager.start().await;

		let info = manager.wait_for_job(info.id, None).await.expect("terminal");
		assert_eq!(info.status, JobStatus::Failed);
		assert_eq!(info.error_history.len(), 2);
		assert!(info.error.expect("error").contains("timed out"));
	}

	#[tokio::test(start_paused = true)]
	async fn follow_up_work_is_not_bound_by_the_attempt_timeout() {
		let executor = MockExecutor::new(Behavior::SlowFollowUp(Duration::from_millis(300)));
		let manager = manager(
			ExecutorConfig {
				job_timeout_ms: 100,
				max_retries: 2,
				..Default::default()
			},
			Arc::clone(&executor),
		);

		let info = manager.submit(job()).await.expect("submitted");
		manager.start().await;

		let info = manager.wait_for_job(info.id, None).await.expect("terminal");
		assert_eq!(info.status, JobStatus::Completed);
		assert_eq!(info.attempts, 1);
		assert!(info.error_history.is_empty());
		assert_eq!(executor.attempts.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn same_key_jobs_run_one_at_a_time_in_order() {
		let executor = MockExecutor::new(Behavior::Succeed);
		let manager = manager(
			ExecutorConfig {
				max_concurrency: 4,
				..Default::default()
			},
			Arc::clone(&executor),
		);

		let mut ids = Vec::new();
		for _ in 0..5 {
			ids.push(manager.submit(job()).await.expect("submitted").id);
		}

		manager.start().await;

		for id in &ids {
			let info = manager.wait_for_job(*id, None).await.expect("terminal");
			assert_eq!(info.status, JobStatus::Completed);
		}

		assert_eq!(*executor.order.lock().expect("lock"), ids);
		assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
		assert!(manager.stop().await.is_graceful());
	}

	#[tokio::test(start_paused = true)]
	async fn graceful_shutdown_lets_running_jobs_finish() {
		let executor = MockExecutor::new(Behavior::Sleep(Duration::from_millis(100)));
		let manager = manager(
			ExecutorConfig {
				shutdown_grace_ms: 1_000,
				..Default::default()
			},
			executor,
		);

		let info = manager.submit(job()).await.expect("submitted");
		manager.start().await;
		tokio::time::sleep(Duration::from_millis(10)).await;

		assert_eq!(manager.stop().await, ShutdownStatus::Graceful);
		assert_eq!(
			manager.tracker().get(info.id).map(|info| info.status),
			Some(JobStatus::Completed)
		);
		assert!(matches!(
			manager.submit(job()).await,
			Err(JobError::Queue(_))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn forced_shutdown_cancels_running_jobs() {
		let executor = MockExecutor::new(Behavior::Sleep(Duration::from_secs(3_600)));
		let manager = manager(
			ExecutorConfig {
				shutdown_grace_ms: 100,
				..Default::default()
			},
			executor,
		);

		let info = manager.submit(job()).await.expect("submitted");
		manager.start().await;
		tokio::time::sleep(Duration::from_millis(10)).await;

		assert_eq!(
			manager.stop().await,
			ShutdownStatus::Forced { aborted_jobs: 1 }
		);

		let info = manager.tracker().get(info.id).expect("tracked");
		assert_eq!(info.status, JobStatus::Failed);
		assert_eq!(info.error.as_deref(), Some("job cancelled"));
	}
}
