//! Cancellation signal shared between a daemon's owner and its watcher

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// Clonable, fire-once cancellation token.
///
/// Every clone observes the same flag. A token that is never cancelled
/// keeps its waiters blocked forever.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<State>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token and wake every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        *cancelled = true;
        self.state.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Block until the token fires.
    pub fn wait(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        while !*cancelled {
            cancelled = self
                .state
                .cond
                .wait(cancelled)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    /// Block until the token fires or `timeout` elapses. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let (cancelled, _) = self
            .state
            .cond
            .wait_timeout_while(cancelled, timeout, |fired| !*fired)
            .unwrap_or_else(|poison| poison.into_inner());
        *cancelled
    }
}
