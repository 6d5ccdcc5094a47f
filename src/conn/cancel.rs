use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use event_listener::{Event, Listener};


type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    event: Event,
    hooks: Mutex<Vec<Hook>>,
}

impl Inner {
    fn hooks(&self) -> MutexGuard<'_, Vec<Hook>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


/// A shared flag that asks a connection to stop.
///
/// Clones refer to the same flag. Cancelling wakes all threads waiting on
/// the token and runs the registered hooks once, which is how a blocked read
/// on a socket gets interrupted.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<Inner>);

impl CancelToken {
    /// Creates a new, uncancelled [`CancelToken`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tests whether [`CancelToken::cancel`] was called on any clone.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the token, wakes all waiters, and runs all registered hooks.
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.0.event.notify(usize::MAX);
        let hooks = std::mem::take(&mut *self.0.hooks());
        tracing::debug!(hooks = hooks.len(), "cancellation requested");
        for hook in hooks {
            hook();
        }
    }

    /// Registers `hook` to run on cancellation. If the token is already
    /// cancelled, `hook` runs immediately.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.0.hooks();
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }

    /// Blocks the current thread until the token is cancelled.
    pub fn wait(&self) {
        while !self.is_cancelled() {
            let listener = self.0.event.listen();
            if self.is_cancelled() {
                break;
            }
            listener.wait();
        }
    }

    /// Blocks the current thread until the token is cancelled or `timeout`
    /// has elapsed. Returns whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if !self.is_cancelled() {
            let listener = self.0.event.listen();
            if !self.is_cancelled() {
                let _ = listener.wait_timeout(timeout);
            }
        }
        self.is_cancelled()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("CancelToken").field(&self.is_cancelled()).finish()
    }
}
