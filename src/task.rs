use super::{
    errors::BoxError,
    scope::CancellationScope,
};
use std::{
    fmt,
    future::Future,
    time::Duration,
};
use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

/// Ordinal of a worker inside one batch, starting at 0.
pub type WorkerId = usize;

/// Boxed task as handed out by a [`TaskSource`](crate::source::TaskSource).
pub type BoxedTask<T> = Box<dyn Task<Output = T>>;

/// Execution context handed to a running task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    worker_id: WorkerId,
    scope: CancellationScope,
}

impl TaskContext {
    pub fn new(worker_id: WorkerId, scope: CancellationScope) -> Self {
        Self { worker_id, scope }
    }

    #[inline]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.scope.is_armed()
    }

    /// Resolves when this task's scope arms: per-task timeout or batch cancel.
    pub async fn cancelled(&self) {
        self.scope.armed().await
    }

    /// Token to hand to cancellation-aware I/O (e.g. to abort a request).
    pub fn cancel_token(&self) -> CancellationToken {
        self.scope.token().clone()
    }
}

/// A unit of work run by exactly one worker, exactly once.
///
/// The worker drops the task after `after_execute` returns.
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    /// Human readable label used in outcomes and logs.
    fn describe(&self) -> String;

    fn execute(&mut self, ctx: TaskContext) -> BoxFuture<'_, Result<Self::Output, BoxError>>;

    /// Called on the worker right before `execute`.
    fn before_execute(&mut self, _worker_id: WorkerId) {}

    /// Called on the worker once the execution settled, whatever the result.
    fn after_execute(&mut self, _worker_id: WorkerId, _elapsed: Duration, _succeeded: bool) {}
}

/// Closure-backed [`Task`].
pub struct TaskFn<F> {
    description: String,
    f: Option<F>,
}

impl<F> TaskFn<F> {
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            description: description.into(),
            f: Some(f),
        }
    }
}

impl<F, Fut, T> TaskFn<F>
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Send + 'static,
{
    pub fn boxed(description: impl Into<String>, f: F) -> BoxedTask<T> {
        Box::new(Self::new(description, f))
    }
}

impl<F> fmt::Debug for TaskFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFn")
            .field("description", &self.description)
            .field("consumed", &self.f.is_none())
            .finish()
    }
}

impl<F, Fut, T> Task for TaskFn<F>
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn describe(&self) -> String {
        self.description.clone()
    }

    fn execute(&mut self, ctx: TaskContext) -> BoxFuture<'_, Result<T, BoxError>> {
        match self.f.take() {
            Some(f) => f(ctx).boxed(),
            None => {
                let err: BoxError = format!("task '{}' already executed", self.description).into();
                futures::future::ready(Err(err)).boxed()
            }
        }
    }
}
