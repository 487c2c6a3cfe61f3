use super::{
    errors::{ErrorKind, TaskError},
    scope::ArmReason,
    task::WorkerId,
};
use std::{
    fmt,
    time::{Duration, SystemTime},
};

/// Classified result of one dispatched task.
#[derive(Debug)]
pub struct Outcome<T> {
    /// Position in dispatch order, starting at 1.
    pub seq: u64,
    pub description: String,
    /// Worker that ran the task; `None` if it was cancelled before starting.
    pub worker_id: Option<WorkerId>,
    pub started_at: SystemTime,
    pub elapsed: Duration,
    pub result: Result<T, TaskError>,
}

impl<T> Outcome<T> {
    /// Outcome for a task that was dispatched but never started.
    pub(crate) fn abandoned(seq: u64, description: String) -> Self {
        Self::unstarted(seq, description, TaskError::Cancelled)
    }

    pub(crate) fn unstarted(seq: u64, description: String, error: TaskError) -> Self {
        Self {
            seq,
            description,
            worker_id: None,
            started_at: SystemTime::now(),
            elapsed: Duration::ZERO,
            result: Err(error),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(TaskError::kind)
    }

    #[inline]
    pub fn was_executed(&self) -> bool {
        self.worker_id.is_some()
    }
}

/// Per-worker bookkeeping. Written only by its own worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub tasks_completed: usize,
    pub total_busy: Duration,
}

impl WorkerRecord {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub(crate) fn track(&mut self, elapsed: Duration) {
        self.tasks_completed += 1;
        self.total_busy += elapsed;
    }
}

/// Finalized accounting of one batch.
#[derive(Debug)]
pub struct ResultSet<T> {
    /// First `quota` successes, in completion order.
    pub winners: Vec<Outcome<T>>,
    /// Every other outcome, in completion order.
    pub losers: Vec<Outcome<T>>,
    /// Tasks pulled from the source.
    pub dispatched: usize,
    pub workers: Vec<WorkerRecord>,
    /// Why the batch scope armed, if it did.
    pub stop_reason: Option<ArmReason>,
    pub elapsed: Duration,
}

impl<T> ResultSet<T> {
    #[inline]
    pub fn total(&self) -> usize {
        self.winners.len() + self.losers.len()
    }

    /// Losers cancelled after dispatch but before reaching a worker.
    pub fn abandoned(&self) -> usize {
        self.losers
            .iter()
            .filter(|o| !o.was_executed() && o.error_kind() == Some(ErrorKind::Cancelled))
            .count()
    }

    pub fn losers_of_kind(&self, kind: ErrorKind) -> impl Iterator<Item = &Outcome<T>> {
        self.losers.iter().filter(move |o| o.error_kind() == Some(kind))
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            dispatched: self.dispatched,
            winners: self.winners.len(),
            stop_reason: self.stop_reason,
            elapsed: self.elapsed,
            ..Default::default()
        };
        for outcome in &self.losers {
            match outcome.error_kind() {
                None => summary.late_successes += 1,
                Some(ErrorKind::TaskFailure) => summary.failures += 1,
                Some(ErrorKind::Timeout) => summary.timeouts += 1,
                Some(ErrorKind::Cancelled) if outcome.was_executed() => summary.cancelled += 1,
                Some(ErrorKind::Cancelled) => summary.abandoned += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub dispatched: usize,
    pub winners: usize,
    pub late_successes: usize,
    pub failures: usize,
    pub timeouts: usize,
    pub cancelled: usize,
    pub abandoned: usize,
    pub stop_reason: Option<ArmReason>,
    pub elapsed: Duration,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dispatched in {:?}: {} winners, {} late, {} failed, {} timed out, {} cancelled, {} abandoned",
            self.dispatched,
            self.elapsed,
            self.winners,
            self.late_successes,
            self.failures,
            self.timeouts,
            self.cancelled,
            self.abandoned,
        )?;
        if let Some(reason) = self.stop_reason {
            write!(f, " (stopped: {:?})", reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub dop: usize,
    pub active_tasks: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub total_dispatched: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.dop == 0 {
            return 0.0;
        }
        self.active_tasks as f64 / self.dop as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}
