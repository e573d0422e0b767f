use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct Flag {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cooperative cancellation with a timed wait. A child token is cancelled
/// when either it or any of its ancestors is.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<Flag>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken {
            flag: Arc::new(Flag { cancelled: Mutex::new(false), wake: Condvar::new() }),
            parent: None,
        }
    }

    pub fn child(&self) -> CancelToken {
        let mut child = CancelToken::new();
        child.parent = Some(Box::new(self.clone()));
        child
    }

    pub fn cancel(&self) {
        let mut c = self.flag.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        *c = true;
        self.flag.wake.notify_all();
    }

    fn own_cancelled(&self) -> bool {
        *self.flag.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_cancelled(&self) -> bool {
        self.own_cancelled() || self.parent.as_ref().map(|p| p.is_cancelled()).unwrap_or(false)
    }

    /// Sleeps for `step` unless cancelled first. Returns `true` if the token
    /// is cancelled when the wait ends. Cancellation of an ancestor is seen
    /// at the end of the step at the latest.
    pub fn wait(&self, step: Duration) -> bool {
        let deadline = Instant::now() + step;
        let mut cancelled = self.flag.cancelled.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _timeout) = self.flag.wake
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
        }
        let own = *cancelled;
        drop(cancelled);
        own || self.parent.as_ref().map(|p| p.is_cancelled()).unwrap_or(false)
    }
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::new()
    }
}
