//! In-flight invocation ceiling for one executor.
//!
//! [`RecursionGuard`] counts how many tool invocations an executor currently
//! has running, nested or concurrent alike, and refuses new ones once
//! `max_depth` are in flight. A successful [`RecursionGuard::enter`] returns a
//! [`DepthPermit`]; dropping the permit gives the slot back. This covers
//! early returns, errors, timeouts, panics and cancelled futures.
//!
//! ```ignore
//! let guard = RecursionGuard::new(2);
//! let permit = guard.enter()?;
//! assert_eq!(guard.depth(), 1);
//! drop(permit);
//! assert_eq!(guard.depth(), 0);
//! ```

use std::sync::{Arc, Mutex};
use thiserror::Error;

/// The ceiling was already reached. The counter was not touched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("recursion depth limit of {max_depth} reached")]
pub struct DepthLimitReached {
    pub max_depth: usize,
}

#[derive(Debug)]
struct GuardState {
    depth: Mutex<usize>,
    max_depth: usize,
}

impl GuardState {
    fn release(&self) {
        let mut depth = self.depth.lock().unwrap_or_else(|e| e.into_inner());
        *depth = depth.saturating_sub(1);
    }
}

/// Shared in-flight counter. Cloning yields a handle to the same counter.
#[derive(Debug, Clone)]
pub struct RecursionGuard {
    state: Arc<GuardState>,
}

impl RecursionGuard {
    /// Create a guard admitting at most `max_depth` concurrent holders.
    ///
    /// The executor rejects a zero ceiling at construction; a guard built
    /// directly with zero admits nothing.
    pub fn new(max_depth: usize) -> Self {
        Self {
            state: Arc::new(GuardState {
                depth: Mutex::new(0),
                max_depth,
            }),
        }
    }

    /// Take one slot, or fail without changing the count.
    pub fn enter(&self) -> Result<DepthPermit, DepthLimitReached> {
        let mut depth = self.state.depth.lock().unwrap_or_else(|e| e.into_inner());
        if *depth >= self.state.max_depth {
            return Err(DepthLimitReached {
                max_depth: self.state.max_depth,
            });
        }
        *depth += 1;
        Ok(DepthPermit {
            state: Arc::clone(&self.state),
        })
    }

    /// Current number of holders.
    pub fn depth(&self) -> usize {
        *self.state.depth.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn max_depth(&self) -> usize {
        self.state.max_depth
    }

    /// Whether an `enter()` right now would succeed.
    pub fn can_enter(&self) -> bool {
        self.depth() < self.state.max_depth
    }
}

/// One held slot of a [`RecursionGuard`]. Released on drop.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct DepthPermit {
    state: Arc<GuardState>,
}

impl DepthPermit {
    /// Release the slot now. Same as dropping the permit.
    pub fn exit(self) {}
}

impl Drop for DepthPermit {
    fn drop(&mut self) {
        self.state.release();
    }
}
