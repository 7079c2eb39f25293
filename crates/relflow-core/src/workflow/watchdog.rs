//! Per-execution hang detection.
//!
//! Each ordinary step execution gets a watchdog armed with the configured
//! delay (times the step's scale factor). Logging through the task context
//! pushes the deadline out. If the deadline passes, the watchdog fires once
//! and stays fired: the step's context is cancelled and its outcome is
//! recorded as hung regardless of what it returns.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

#[derive(Debug)]
struct WatchdogState {
    deadline: Instant,
    scale: u32,
    disabled: bool,
    expired: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Watchdog {
    delay: Duration,
    state: Arc<Mutex<WatchdogState>>,
}

impl Watchdog {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(WatchdogState {
                deadline: Instant::now() + delay,
                scale: 1,
                disabled: false,
                expired: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WatchdogState> {
        // The state is plain data; a poisoned lock still holds a usable value.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The interval the watchdog currently allows between resets.
    pub(crate) fn interval(&self) -> Duration {
        let scale = self.lock().scale;
        self.delay.saturating_mul(scale)
    }

    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        if state.disabled || state.expired {
            return;
        }
        state.deadline = Instant::now() + self.delay.saturating_mul(state.scale);
    }

    pub(crate) fn set_scale(&self, scale: u32) {
        self.lock().scale = scale.max(1);
        self.reset();
    }

    pub(crate) fn disable(&self) {
        self.lock().disabled = true;
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.lock().expired
    }

    /// Resolves once the deadline passes without a reset. Never resolves
    /// while disabled.
    pub(crate) async fn expired(&self) {
        loop {
            let (deadline, disabled) = {
                let state = self.lock();
                (state.deadline, state.disabled)
            };
            if disabled {
                std::future::pending::<()>().await;
            }
            sleep_until(deadline).await;

            let mut state = self.lock();
            if state.expired {
                return;
            }
            if !state.disabled && Instant::now() >= state.deadline {
                state.expired = true;
                return;
            }
        }
    }
}
