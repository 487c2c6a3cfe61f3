use super::{
    errors::{ConfigError, PoolError, TaskError},
    model::{Outcome, PoolMetrics, ResultSet, WorkerRecord},
    result::Aggregator,
    scope::{ArmReason, CancellationScope},
    source::TaskSource,
    task::{BoxedTask, TaskContext, WorkerId},
};
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::SystemTime,
};
use futures::FutureExt;
use tokio::{
    sync::{mpsc, Mutex, Semaphore, SemaphorePermit},
    time::{Duration, Instant},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, trace, warn};


/// Конфигурация пула
#[derive(Debug, Clone)]
pub struct Config {
    /// Degree of parallelism: executions allowed at the same time.
    pub dop: usize,
    /// Ceiling for [`WorkerPoolInner::resize`]. Defaults to `dop`.
    pub max_dop: Option<usize>,
    /// Slots in the queue between the producer and the workers.
    pub queue_capacity: usize,
    pub task_timeout: Duration,
    /// Deadline for the whole batch.
    pub global_timeout: Option<Duration>,
    /// Successes after which the batch is cancelled.
    pub quota: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            dop: num_cpus * 2, // Для I/O-bound задач
            max_dop: None,
            queue_capacity: 1,
            task_timeout: Duration::from_secs(30),
            global_timeout: None,
            quota: None,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            dop: num_cpus::get(),
            task_timeout: Duration::from_secs(60),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        let dop = num_cpus::get() * 2;
        Self {
            dop,
            queue_capacity: dop,
            ..Default::default()
        }
    }

    pub fn with_dop(mut self, dop: usize) -> Self {
        self.dop = dop;
        self
    }

    pub fn with_max_dop(mut self, max_dop: usize) -> Self {
        self.max_dop = Some(max_dop);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    #[inline]
    pub fn max_dop(&self) -> usize {
        self.max_dop.unwrap_or(self.dop)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dop < 1 {
            return Err(ConfigError::InvalidDop(self.dop));
        }
        if self.max_dop() < self.dop {
            return Err(ConfigError::InvalidMaxDop {
                dop: self.dop,
                max: self.max_dop(),
            });
        }
        if self.queue_capacity < 1 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("task"));
        }
        if self.global_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout("global"));
        }
        if self.quota == Some(0) {
            return Err(ConfigError::ZeroQuota);
        }
        Ok(())
    }
}


pub type WorkerPool = Arc<WorkerPoolInner>;

/// A task on its way from the producer to a worker.
struct Dispatched<T> {
    seq: u64,
    description: String,
    task: BoxedTask<T>,
}

type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<Dispatched<T>>>>;

/// Пул воркеров с ограничением параллелизма, квотой и отменой
///
/// Every [`run`](Self::run) spawns one producer and `max_dop` workers. A
/// counting semaphore with `dop` permits gates execution, so at most `dop`
/// tasks run at any instant; [`resize`](Self::resize) moves that bound without
/// touching live workers.
pub struct WorkerPoolInner {
    config: Config,
    permits: Semaphore,
    dop: AtomicUsize,
    resize_lock: Mutex<()>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    active_tasks: AtomicUsize,
    idle_workers: AtomicUsize,
    queued_tasks: AtomicUsize,
    total_dispatched: AtomicUsize,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
}

impl WorkerPoolInner {
    pub fn new(dop: usize) -> Result<WorkerPool, PoolError> {
        Self::with_config(Config::default().with_dop(dop))
    }

    pub fn with_config(config: Config) -> Result<WorkerPool, PoolError> {
        config.validate()?;

        Ok(Arc::new(WorkerPoolInner {
            permits: Semaphore::new(config.dop),
            dop: AtomicUsize::new(config.dop),
            resize_lock: Mutex::new(()),
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active_tasks: AtomicUsize::new(0),
            idle_workers: AtomicUsize::new(0),
            queued_tasks: AtomicUsize::new(0),
            total_dispatched: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            config,
        }))
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn current_dop(&self) -> usize {
        self.dop.load(Ordering::Acquire)
    }

    /// Runs every task `source` yields and returns the classified outcomes.
    ///
    /// Returns early, with every dispatched task accounted for, once the quota
    /// is met, the global timeout fires or the pool is shut down.
    pub async fn run<T, S>(self: &Arc<Self>, source: S) -> Result<ResultSet<T>, PoolError>
    where
        T: Send + 'static,
        S: TaskSource<T> + 'static,
    {
        if self.shutdown_token.is_cancelled() {
            return Err(PoolError::ShutDown);
        }
        if let (Some(quota), Some(total)) = (self.config.quota, source.size_hint()) {
            if quota > total {
                return Err(ConfigError::QuotaExceedsTasks { quota, total }.into());
            }
        }

        let started = Instant::now();
        let num_workers = self.config.max_dop();
        debug!(
            dop = self.current_dop(),
            workers = num_workers,
            quota = ?self.config.quota,
            global_timeout = ?self.config.global_timeout,
            "batch started"
        );

        let batch = CancellationScope::from_token(self.shutdown_token.child_token());
        let aggregator = Arc::new(Aggregator::new(self.config.quota, batch.clone()));
        let dispatched = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let rx: SharedReceiver<T> = Arc::new(Mutex::new(rx));

        let timer = self
            .config
            .global_timeout
            .map(|limit| batch.arm_after(limit, ArmReason::GlobalTimeout));

        let producer = {
            let pool = Arc::clone(self);
            let batch = batch.clone();
            let aggregator = Arc::clone(&aggregator);
            let dispatched = Arc::clone(&dispatched);
            self.tracker.spawn(async move {
                pool.produce(source, tx, batch, aggregator, dispatched).await;
            })
        };

        // Запускаем воркеры
        let workers: Vec<_> = (0..num_workers)
            .map(|id| {
                let pool = Arc::clone(self);
                let rx = Arc::clone(&rx);
                let batch = batch.clone();
                let aggregator = Arc::clone(&aggregator);
                self.tracker.spawn(async move {
                    pool.worker_loop(id, rx, batch, aggregator).await
                })
            })
            .collect();

        let mut records = Vec::with_capacity(num_workers);
        for handle in workers {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => error!(error = %e, "worker terminated abnormally"),
            }
        }
        if let Err(e) = producer.await {
            error!(error = %e, "producer terminated abnormally");
        }

        // Workers stop pulling once the batch is armed; whatever is still queued never ran.
        {
            let mut rx = rx.lock().await;
            rx.close();
            while let Ok(item) = rx.try_recv() {
                self.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                aggregator.record(Outcome::abandoned(item.seq, item.description));
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let stop_reason = if batch.is_armed() {
            batch.reason().or(Some(ArmReason::Shutdown))
        } else {
            None
        };
        let (winners, losers) = aggregator.finalize();
        let result = ResultSet {
            winners,
            losers,
            dispatched: dispatched.load(Ordering::Acquire),
            workers: records,
            stop_reason,
            elapsed: started.elapsed(),
        };

        debug!(
            dispatched = result.dispatched,
            winners = result.winners.len(),
            losers = result.losers.len(),
            stop_reason = ?result.stop_reason,
            elapsed = ?result.elapsed,
            "batch finished"
        );
        Ok(result)
    }

    async fn produce<T, S>(
        &self,
        mut source: S,
        tx: mpsc::Sender<Dispatched<T>>,
        batch: CancellationScope,
        aggregator: Arc<Aggregator<T>>,
        dispatched: Arc<AtomicUsize>,
    ) where
        T: Send + 'static,
        S: TaskSource<T> + 'static,
    {
        let mut seq = 0u64;

        while !batch.is_armed() {
            let pulled = if source.is_blocking() {
                match tokio::task::spawn_blocking(move || {
                    let pulled = pull::<T, S>(&mut source);
                    (source, pulled)
                })
                .await
                {
                    Ok((returned, pulled)) => {
                        source = returned;
                        pulled
                    }
                    Err(e) => {
                        error!(error = %e, "blocking source call failed, treating it as exhausted");
                        break;
                    }
                }
            } else {
                pull::<T, S>(&mut source)
            };

            let task = match pulled {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(panic) => {
                    error!(panic = %panic, "task source panicked, treating it as exhausted");
                    break;
                }
            };

            seq += 1;
            dispatched.fetch_add(1, Ordering::Relaxed);
            self.total_dispatched.fetch_add(1, Ordering::Relaxed);

            let description = match std::panic::catch_unwind(AssertUnwindSafe(|| task.describe())) {
                Ok(description) => description,
                Err(panic) => {
                    let panic = panic_message(panic.as_ref());
                    warn!(seq, panic = %panic, "describe panicked, task not started");
                    self.failed_tasks.fetch_add(1, Ordering::Relaxed);
                    aggregator.record(Outcome::unstarted(seq, format!("task #{seq}"), TaskError::Panic(panic)));
                    continue;
                }
            };
            let item = Dispatched { seq, description, task };

            let slot = tokio::select! {
                biased;
                _ = batch.armed() => None,
                slot = tx.reserve() => slot.ok(),
            };
            match slot {
                Some(slot) => {
                    self.queued_tasks.fetch_add(1, Ordering::Relaxed);
                    slot.send(item);
                }
                None => {
                    aggregator.record(Outcome::abandoned(item.seq, item.description));
                    break;
                }
            }
        }

        debug!(dispatched = seq, cancelled = batch.is_armed(), "producer finished");
    }

    async fn worker_loop<T: Send + 'static>(
        &self,
        id: WorkerId,
        rx: SharedReceiver<T>,
        batch: CancellationScope,
        aggregator: Arc<Aggregator<T>>,
    ) -> WorkerRecord {
        let mut record = WorkerRecord::new(id);

        loop {
            self.idle_workers.fetch_add(1, Ordering::Relaxed);
            let next = tokio::select! {
                biased;
                _ = batch.armed() => None,
                next = self.next_dispatch(&rx) => next,
            };
            self.idle_workers.fetch_sub(1, Ordering::Relaxed);

            let Some((permit, item)) = next else { break };
            self.queued_tasks.fetch_sub(1, Ordering::Relaxed);

            if batch.is_armed() {
                aggregator.record(Outcome::abandoned(item.seq, item.description));
                break;
            }

            let outcome = self.execute(id, item, &batch).await;
            drop(permit);

            record.track(outcome.elapsed);
            aggregator.record(outcome);
        }

        trace!(worker = id, tasks = record.tasks_completed, busy = ?record.total_busy, "worker exiting");
        record
    }

    /// Waits for an execution slot, then for the next queued task.
    async fn next_dispatch<T>(
        &self,
        rx: &Mutex<mpsc::Receiver<Dispatched<T>>>,
    ) -> Option<(SemaphorePermit<'_>, Dispatched<T>)> {
        let permit = self.permits.acquire().await.ok()?;
        let item = rx.lock().await.recv().await?;
        Some((permit, item))
    }

    async fn execute<T: Send + 'static>(
        &self,
        worker_id: WorkerId,
        item: Dispatched<T>,
        batch: &CancellationScope,
    ) -> Outcome<T> {
        let Dispatched { seq, description, mut task } = item;
        let task_scope = batch.child();
        let ctx = TaskContext::new(worker_id, task_scope.clone());
        let limit = self.config.task_timeout;

        trace!(worker = worker_id, seq, task = %description, "task started");
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
        let started_at = SystemTime::now();
        let start = Instant::now();

        let result = {
            let run = AssertUnwindSafe(async {
                task.before_execute(worker_id);
                task.execute(ctx).await
            })
            .catch_unwind();

            tokio::select! {
                biased;
                _ = task_scope.armed() => Err(TaskError::Cancelled),
                res = run => match res {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(cause)) => Err(TaskError::Failure(cause)),
                    Err(panic) => Err(TaskError::Panic(panic_message(panic.as_ref()))),
                },
                _ = tokio::time::sleep(limit) => {
                    task_scope.arm(ArmReason::TaskTimeout);
                    Err(TaskError::Timeout(limit))
                }
            }
        };

        let elapsed = start.elapsed();
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);

        let succeeded = result.is_ok();
        if succeeded {
            self.completed_tasks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }

        let hook = std::panic::catch_unwind(AssertUnwindSafe(|| {
            task.after_execute(worker_id, elapsed, succeeded)
        }));
        if let Err(panic) = hook {
            warn!(worker = worker_id, seq, panic = %panic_message(panic.as_ref()), "after_execute hook panicked");
        }

        trace!(worker = worker_id, seq, ?elapsed, succeeded, "task settled");
        Outcome {
            seq,
            description,
            worker_id: Some(worker_id),
            started_at,
            elapsed,
            result,
        }
    }

    /// Moves the concurrency bound to `new_dop`.
    ///
    /// Growing takes effect immediately. Shrinking waits until enough running
    /// tasks finish and hand their slots back; no worker is interrupted.
    pub async fn resize(&self, new_dop: usize) -> Result<(), PoolError> {
        let max = self.config.max_dop();
        if new_dop < 1 || new_dop > max {
            return Err(ConfigError::InvalidResize { requested: new_dop, max }.into());
        }

        let _guard = self.resize_lock.lock().await;
        let current = self.dop.load(Ordering::Acquire);

        if new_dop > current {
            self.permits.add_permits(new_dop - current);
        } else if new_dop < current {
            let shrink = u32::try_from(current - new_dop)
                .map_err(|_| ConfigError::InvalidResize { requested: new_dop, max })?;
            tokio::select! {
                permits = self.permits.acquire_many(shrink) => match permits {
                    Ok(permits) => permits.forget(),
                    Err(_) => return Err(PoolError::ShutDown),
                },
                _ = self.shutdown_token.cancelled() => return Err(PoolError::ShutDown),
            }
        }

        self.dop.store(new_dop, Ordering::Release);
        debug!(from = current, to = new_dop, "pool resized");
        Ok(())
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            dop: self.current_dop(),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Cancels every running batch and waits for their workers to exit.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub async fn shutdown_timeout(&self, timeout: Duration) -> bool {
        self.shutdown_token.cancel();
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }

    /// Периодически отдаёт снимок метрик в `callback`.
    /// Остановка: `stop_monitoring(token)` или shutdown пула.
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let pool = Arc::clone(self);
        let token = self.shutdown_token.child_token();
        let stop = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => callback(pool.metrics()),
                }
            }
            trace!("monitoring stopped");
        });

        token
    }

    pub fn stop_monitoring(token: CancellationToken) {
        token.cancel();
    }
}

/// Builds a pool for a single batch and runs it.
pub async fn run_batch<T, S>(config: Config, source: S) -> Result<ResultSet<T>, PoolError>
where
    T: Send + 'static,
    S: TaskSource<T> + 'static,
{
    let pool = WorkerPoolInner::with_config(config)?;
    pool.run(source).await
}

/// Next task from `source`; a panic comes back as its message.
fn pull<T, S: TaskSource<T>>(source: &mut S) -> Result<Option<BoxedTask<T>>, String> {
    std::panic::catch_unwind(AssertUnwindSafe(|| source.next_task()))
        .map_err(|panic| panic_message(panic.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
