//! The context handed to every task and action execution.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::watchdog::Watchdog;

// ---------------------------------------------------------------------------
// Step log sinks
// ---------------------------------------------------------------------------

/// Destination for a step's diagnostic output.
pub trait StepLogger: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards step output to `tracing`.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    workflow_id: Uuid,
    step: String,
}

impl TracingLogger {
    pub fn new(workflow_id: Uuid, step: impl Into<String>) -> Self {
        Self {
            workflow_id,
            step: step.into(),
        }
    }
}

impl StepLogger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(workflow_id = %self.workflow_id, step = %self.step, "{message}");
    }
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Per-execution context: identity, logging, cancellation, and control over
/// the engine's retry and watchdog behaviour for this execution.
#[derive(Clone)]
pub struct TaskContext {
    workflow_id: Uuid,
    step: Arc<str>,
    retry_count: u32,
    token: CancellationToken,
    logger: Arc<dyn StepLogger>,
    watchdog: Watchdog,
    retries_disabled: Arc<AtomicBool>,
}

impl TaskContext {
    pub(crate) fn new(
        workflow_id: Uuid,
        step: &str,
        retry_count: u32,
        token: CancellationToken,
        logger: Arc<dyn StepLogger>,
        watchdog: Watchdog,
    ) -> Self {
        Self {
            workflow_id,
            step: Arc::from(step),
            retry_count,
            token,
            logger,
            watchdog,
            retries_disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn step_name(&self) -> &str {
        &self.step
    }

    /// How many times this step has already been retried.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Write to the step's log sink. Also counts as a sign of life for the
    /// watchdog.
    pub fn log(&self, message: impl fmt::Display) {
        self.watchdog.reset();
        self.logger.log(&message.to_string());
    }

    /// Resolves when the workflow is cancelled or the watchdog gives up on
    /// this execution.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Failures of this execution will not be retried automatically.
    pub fn disable_retries(&self) {
        self.retries_disabled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn retries_disabled(&self) -> bool {
        self.retries_disabled.load(Ordering::SeqCst)
    }

    pub fn disable_watchdog(&self) {
        self.watchdog.disable();
    }

    /// Allow `scale` times the configured interval between signs of life.
    pub fn set_watchdog_scale(&self, scale: u32) {
        self.watchdog.set_scale(scale);
    }

    pub fn reset_watchdog(&self) {
        self.watchdog.reset();
    }

    pub(crate) fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("workflow_id", &self.workflow_id)
            .field("step", &self.step)
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Capture(Mutex<Vec<String>>);

    impl StepLogger for Capture {
        fn log(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn ctx(logger: Arc<dyn StepLogger>) -> TaskContext {
        TaskContext::new(
            Uuid::nil(),
            "build",
            2,
            CancellationToken::new(),
            logger,
            Watchdog::new(Duration::from_secs(60)),
        )
    }

    #[test]
    fn log_reaches_sink() {
        let capture = Arc::new(Capture::default());
        let ctx = ctx(capture.clone());
        ctx.log(format_args!("attempt {}", ctx.retry_count()));
        assert_eq!(*capture.0.lock().unwrap(), vec!["attempt 2".to_string()]);
        assert_eq!(ctx.step_name(), "build");
    }

    #[test]
    fn disable_retries_is_shared_between_clones() {
        let ctx = ctx(Arc::new(TracingLogger::new(Uuid::nil(), "build")));
        let clone = ctx.clone();
        clone.disable_retries();
        assert!(ctx.retries_disabled());
    }

    #[test]
    fn cancellation_is_observable() {
        let ctx = ctx(Arc::new(Capture::default()));
        assert!(!ctx.is_cancelled());
        ctx.token().cancel();
        assert!(ctx.is_cancelled());
    }
}
