// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! External shutdown of the run loop.
//!
//! AtomicBool flag checked once per tick. It is `Send`, so a signal
//! handler thread can stop a scheduler running on another thread; the
//! loop notices after the current poll returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run loop to stop before its next tick.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
