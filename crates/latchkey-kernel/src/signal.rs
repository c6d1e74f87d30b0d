//! [`PipelineSignal`] – cooperative, set-once stop flag.
//!
//! Any stage may raise it (camera loss, operator quit, fatal actuation
//! fault, external shutdown).  Every stage polls it at each loop iteration.
//! Once raised it is never cleared.
//!
//! Stages that sleep between iterations should use
//! [`PipelineSignal::wait_timeout`] instead of `thread::sleep` so they wake
//! up as soon as the signal is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

#[derive(Default)]
struct Inner {
    raised: AtomicBool,
    reason: Mutex<Option<String>>,
    wake: Condvar,
}

/// Shared stop flag.  Cloning yields another handle to the same flag.
#[derive(Clone, Default)]
pub struct PipelineSignal {
    inner: Arc<Inner>,
}

impl PipelineSignal {
    /// Create a cleared signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    ///
    /// Returns `true` for the call that actually raised it and `false` for
    /// every later call; only the first reason is kept and logged.
    pub fn trigger(&self, reason: &str) -> bool {
        let mut slot = match self.inner.reason.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.inner.raised.swap(true, Ordering::AcqRel) {
            return false;
        }
        *slot = Some(reason.to_string());
        drop(slot);
        info!(reason, "pipeline stop signal raised");
        self.inner.wake.notify_all();
        true
    }

    /// `true` once [`PipelineSignal::trigger`] has been called.
    pub fn is_set(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Reason passed to the first effective [`PipelineSignal::trigger`].
    pub fn reason(&self) -> Option<String> {
        match self.inner.reason.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sleep for up to `timeout`, returning early if the signal is raised.
    ///
    /// Returns `true` if the signal is set when the call returns.  A
    /// timeout too large to express as a deadline waits for the signal only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = match self.inner.reason.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !self.is_set() {
            guard = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    match self.inner.wake.wait_timeout(guard, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => match self.inner.wake.wait(guard) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                },
            };
        }
        self.is_set()
    }
}

impl std::fmt::Debug for PipelineSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSignal")
            .field("set", &self.is_set())
            .finish()
    }
}
