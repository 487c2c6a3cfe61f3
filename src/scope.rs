use std::sync::{Arc, OnceLock};
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

/// What armed a scope first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmReason {
    QuotaReached,
    GlobalTimeout,
    TaskTimeout,
    Shutdown,
    Manual,
}

/// One-shot hierarchical stop signal.
///
/// A scope goes from unarmed to armed exactly once and never back. Arming a
/// scope arms every scope derived from it with [`child`](Self::child); arming a
/// child leaves its parent untouched. Concurrent `arm` calls are safe: only
/// the first one takes effect and records its [`ArmReason`].
#[derive(Debug, Clone)]
pub struct CancellationScope {
    token: CancellationToken,
    reason: Arc<OnceLock<ArmReason>>,
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationScope {
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wraps an existing token, e.g. a child of a pool-wide shutdown token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(OnceLock::new()),
        }
    }

    pub fn child(&self) -> Self {
        Self::from_token(self.token.child_token())
    }

    /// Arms the scope. Returns `true` only for the call that armed it.
    pub fn arm(&self, reason: ArmReason) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason recorded by the arm that took effect on this scope. `None` while
    /// unarmed, and also when the scope was only armed through its parent.
    pub fn reason(&self) -> Option<ArmReason> {
        self.reason.get().copied()
    }

    /// Resolves once the scope is armed, directly or through a parent.
    pub async fn armed(&self) {
        self.token.cancelled().await
    }

    /// Token view for task code that already speaks `tokio_util`.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Arms the scope with `reason` after `delay` unless it is armed sooner.
    /// The timer task ends as soon as the scope is armed; abort the handle to
    /// drop it earlier.
    pub fn arm_after(&self, delay: Duration, reason: ArmReason) -> JoinHandle<()> {
        let scope = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    scope.arm(reason);
                }
                _ = scope.armed() => {}
            }
        })
    }
}
