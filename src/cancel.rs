use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared cancellation flag, cloned into every running task.
#[derive(Clone, Debug, Default)]
pub(crate) struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cancellation scope handed to adapters: an external token plus an
/// optional hard deadline. Deadline expiry and external cancellation are
/// indistinguishable from the adapter's point of view.
#[derive(Clone, Debug)]
pub(crate) struct ExecContext {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    pub(crate) fn new(cancel: CancelToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    #[cfg(test)]
    pub(crate) fn unbounded() -> Self {
        Self::new(CancelToken::new(), None)
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.cancel.is_cancelled() || self.expired()
    }

    pub(crate) fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_propagates_to_clones() {
        let token = CancelToken::new();
        let ctx = ExecContext::new(token.clone(), None);
        assert!(!ctx.interrupted());
        token.cancel();
        assert!(ctx.interrupted());
    }

    #[test]
    fn deadline_expires() {
        let ctx = ExecContext::new(CancelToken::new(), Some(Duration::ZERO));
        assert!(ctx.expired());
        assert!(ctx.interrupted());
    }
}
