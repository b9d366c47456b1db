use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation shared between the coordinator and its shard
/// tasks. Executors poll it at segment boundaries only, so iterator state is
/// never abandoned mid-step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Query deadline: a fixed instant plus the cancellation signal.
#[derive(Debug, Clone)]
pub struct Deadline {
    pub at: Instant,
    pub cancel: CancelToken,
}

impl Deadline {
    pub fn within(timeout: std::time::Duration) -> Self {
        Deadline {
            at: Instant::now() + timeout,
            cancel: CancelToken::new(),
        }
    }

    pub fn expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_propagates_to_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
