//! Keepalive scheduling for wait mode.
//!
//! There is no free-running timer: `start` hands back an `ArmedKeepalive` that
//! only exists inside the wait loop's `select!`. Leaving wait drops it, which
//! cancels it.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

#[derive(Debug, Clone, Copy)]
pub struct KeepaliveScheduler {
    interval: Duration,
}

impl KeepaliveScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Arm a fresh timer. Call on every wait entry.
    pub fn start(&self) -> ArmedKeepalive {
        ArmedKeepalive {
            deadline: Box::pin(tokio::time::sleep_until(Instant::now() + self.interval)),
        }
    }
}

/// A keepalive timer bound to one stay in wait mode.
pub struct ArmedKeepalive {
    deadline: Pin<Box<Sleep>>,
}

impl ArmedKeepalive {
    /// Resolves when a no-op is due.
    pub async fn due(&mut self) {
        self.deadline.as_mut().await
    }
}
