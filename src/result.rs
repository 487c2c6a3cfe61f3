use super::{
    model::Outcome,
    scope::{ArmReason, CancellationScope},
};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Where [`Aggregator::record`] placed an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Appended to winners. `filled_quota` is set for exactly one call per
    /// batch: the one that armed the scope.
    Winner { filled_quota: bool },
    Loser,
}

struct Partition<T> {
    winners: Vec<Outcome<T>>,
    losers: Vec<Outcome<T>>,
}

/// Splits outcomes into winners and losers as workers publish them.
///
/// Classification, the append, and the quota trigger run in one critical
/// section, so concurrent successes can never overfill `winners` or arm the
/// scope twice.
pub struct Aggregator<T> {
    state: Mutex<Partition<T>>,
    quota: Option<usize>,
    scope: CancellationScope,
}

impl<T> Aggregator<T> {
    pub fn new(quota: Option<usize>, scope: CancellationScope) -> Self {
        Self {
            state: Mutex::new(Partition {
                winners: Vec::with_capacity(quota.unwrap_or(0)),
                losers: Vec::new(),
            }),
            quota,
            scope,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Partition<T>> {
        // Appends never leave the vectors half-updated, so a poisoned guard is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, outcome: Outcome<T>) -> Recorded {
        let mut state = self.lock();

        let has_room = self.quota.map_or(true, |q| state.winners.len() < q);
        if !(outcome.is_success() && has_room && !self.scope.is_armed()) {
            trace!(seq = outcome.seq, task = %outcome.description, kind = ?outcome.error_kind(), "loser");
            state.losers.push(outcome);
            return Recorded::Loser;
        }

        trace!(seq = outcome.seq, task = %outcome.description, "winner");
        state.winners.push(outcome);

        let filled_quota = match self.quota {
            Some(q) if state.winners.len() == q => self.scope.arm(ArmReason::QuotaReached),
            _ => false,
        };
        if filled_quota {
            debug!(quota = ?self.quota, "quota reached, cancelling batch");
        }
        Recorded::Winner { filled_quota }
    }

    pub fn winners(&self) -> usize {
        self.lock().winners.len()
    }

    pub fn losers(&self) -> usize {
        self.lock().losers.len()
    }

    /// Takes `(winners, losers)` out of the aggregator. Call once every
    /// producer of outcomes is gone; anything recorded later starts a new,
    /// empty partition.
    pub fn finalize(&self) -> (Vec<Outcome<T>>, Vec<Outcome<T>>) {
        let mut state = self.lock();
        (
            std::mem::take(&mut state.winners),
            std::mem::take(&mut state.losers),
        )
    }
}
