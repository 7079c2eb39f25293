//! Single step executions.
//!
//! `run_task` drives one attempt of a task or action under its watchdog and
//! turns the outcome into the step's next state, scheduling an automatic
//! retry when the policy allows. `run_expansion` applies an expansion to a
//! private copy of the Definition.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value as Json;

use relflow_types::config::EngineConfig;

use super::context::TaskContext;
use super::definition::{Definition, ExpandFn, Scope, TaskFn};
use super::instance::StepState;
use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Task executions
// ---------------------------------------------------------------------------

/// Everything one attempt of a task or action needs.
pub(crate) struct TaskRun {
    pub func: TaskFn,
    /// Copy of the step's state taken when it was launched.
    pub state: StepState,
    pub args: Vec<Json>,
    pub ctx: TaskContext,
    pub config: EngineConfig,
}

pub(crate) async fn run_task(run: TaskRun) -> StepState {
    let TaskRun {
        func,
        mut state,
        args,
        ctx,
        config,
    } = run;

    let watchdog = ctx.watchdog().clone();
    let call_ctx = ctx.clone();
    let execution = AssertUnwindSafe(async move { func(call_ctx, args).await }).catch_unwind();
    tokio::pin!(execution);

    let outcome = loop {
        tokio::select! {
            outcome = &mut execution => break outcome,
            _ = watchdog.expired(), if !watchdog.is_expired() => {
                tracing::warn!(
                    workflow_id = %ctx.workflow_id(),
                    step = ctx.step_name(),
                    "step watchdog expired, cancelling execution"
                );
                ctx.token().cancel();
            }
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(payload) => Err(StepError::Panicked(panic_message(payload.as_ref()))),
    };
    let result = if watchdog.is_expired() {
        Err(StepError::Hung {
            interval: watchdog.interval(),
        })
    } else {
        result
    };

    state.finished = true;
    match result {
        Ok(encoded) => {
            state.result = Some(encoded.value);
            state.serialized_result = Some(encoded.serialized);
            state.error = None;
        }
        Err(err) => {
            let message = err.to_string();
            if RetryPolicy::should_retry(&config, state.retry_count, ctx.retries_disabled()) {
                tracing::warn!(
                    workflow_id = %ctx.workflow_id(),
                    step = ctx.step_name(),
                    retry_count = state.retry_count,
                    error = %message,
                    "step failed, scheduling automatic retry"
                );
                ctx.log(RetryPolicy::announcement(&config, state.retry_count, &message));
                return state.next_attempt();
            }
            tracing::debug!(
                workflow_id = %ctx.workflow_id(),
                step = ctx.step_name(),
                error = %message,
                "step failed"
            );
            state.error = Some(message);
        }
    }
    state
}

// ---------------------------------------------------------------------------
// Expansion executions
// ---------------------------------------------------------------------------

pub(crate) struct ExpansionRun {
    pub func: ExpandFn,
    /// Prefix the expansion was registered under.
    pub namespace: String,
    pub state: StepState,
    pub args: Vec<Json>,
    /// Private copy of the workflow's current Definition.
    pub definition: Definition,
}

pub(crate) fn run_expansion(run: ExpansionRun) -> StepState {
    let ExpansionRun {
        func,
        namespace,
        mut state,
        args,
        mut definition,
    } = run;

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut scope = Scope::new(&mut definition, &namespace);
        func(&mut scope, args)
    }));

    state.finished = true;
    match outcome {
        Ok(Ok(())) => state.expanded = Some(definition),
        Ok(Err(err)) => state.error = Some(err.to_string()),
        Err(payload) => state.error = Some(StepError::Panicked(panic_message(payload.as_ref())).to_string()),
    }
    state
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Why a step execution failed. Only the rendered message is kept in the
/// step's state.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("step assumed hung: no sign of life for {interval:?}")]
    Hung { interval: Duration },

    #[error("JSON marshaling of {type_name} failed: {reason}")]
    Serialization { type_name: String, reason: String },

    #[error("JSON marshaling round trip of {type_name} changed the value: {original} became {decoded}")]
    RoundTrip {
        type_name: String,
        original: String,
        decoded: String,
    },

    #[error("argument {index} could not be decoded: {reason}")]
    InvalidInput { index: usize, reason: String },

    #[error("step panicked: {0}")]
    Panicked(String),

    #[error("expanded definition is invalid: {0}")]
    Expansion(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::context::TracingLogger;
    use crate::workflow::definition::{Builder, StepFn};
    use crate::workflow::watchdog::Watchdog;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn task_of(def: &Definition, name: &str) -> TaskFn {
        match &def.steps[name].func {
            StepFn::Task(f) => f.clone(),
            StepFn::Expansion(_) => panic!("{name} is an expansion"),
        }
    }

    fn run_for(def: &Definition, name: &str, state: StepState, config: EngineConfig) -> TaskRun {
        let ctx = TaskContext::new(
            Uuid::nil(),
            name,
            state.retry_count,
            CancellationToken::new(),
            Arc::new(TracingLogger::new(Uuid::nil(), name)),
            Watchdog::new(config.watchdog_delay()),
        );
        TaskRun {
            func: task_of(def, name),
            state,
            args: Vec::new(),
            ctx,
            config,
        }
    }

    async fn fails(_ctx: TaskContext) -> anyhow::Result<String> {
        anyhow::bail!("oops")
    }

    async fn panics(_ctx: TaskContext) -> anyhow::Result<String> {
        panic!("step blew up")
    }

    #[tokio::test]
    async fn success_records_result() {
        let mut def = Definition::new();
        def.task0("ok", |_ctx| async { Ok::<_, anyhow::Error>(42u32) });
        let state = run_task(run_for(&def, "ok", StepState::default(), EngineConfig::default())).await;
        assert!(state.finished);
        assert_eq!(state.result, Some(serde_json::json!(42)));
        assert!(state.serialized_result.is_some());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn failure_with_budget_schedules_retry() {
        let mut def = Definition::new();
        def.task0("bad", fails);
        let state = run_task(run_for(&def, "bad", StepState::default(), EngineConfig::default())).await;
        assert!(!state.started);
        assert!(!state.finished);
        assert_eq!(state.retry_count, 1);
    }

    #[tokio::test]
    async fn failure_without_budget_records_error() {
        let mut def = Definition::new();
        def.task0("bad", fails);
        let state = StepState {
            retry_count: 2,
            ..StepState::default()
        };
        let state = run_task(run_for(&def, "bad", state, EngineConfig::default())).await;
        assert!(state.finished);
        assert_eq!(state.error.as_deref(), Some("oops"));
        assert_eq!(state.retry_count, 2);
    }

    #[tokio::test]
    async fn panic_is_recorded_as_error() {
        let mut def = Definition::new();
        def.task0("boom", panics);
        let config = EngineConfig {
            max_retries: 1,
            ..EngineConfig::default()
        };
        let state = run_task(run_for(&def, "boom", StepState::default(), config)).await;
        assert!(state.finished);
        let err = state.error.unwrap();
        assert!(err.contains("step blew up"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_step_is_assumed_hung() {
        let mut def = Definition::new();
        def.task0("sleepy", |ctx: TaskContext| async move {
            ctx.cancelled().await;
            Ok::<_, anyhow::Error>("woke".to_string())
        });
        let config = EngineConfig {
            max_retries: 1,
            watchdog_delay_ms: 1_000,
        };
        let state = run_task(run_for(&def, "sleepy", StepState::default(), config)).await;
        let err = state.error.unwrap();
        assert!(err.contains("assumed hung"), "{err}");
    }

    #[test]
    fn expansion_registers_into_copy() {
        let mut def = Definition::new();
        def.sub("release").expand0("plan", |scope: &mut Scope<'_>| {
            let v = scope.task0("build", |_ctx| async { Ok::<_, anyhow::Error>(1u8) });
            scope.output("built", &v);
            Ok(())
        });
        let func = match &def.steps["release: plan"].func {
            StepFn::Expansion(f) => f.clone(),
            StepFn::Task(_) => panic!("not an expansion"),
        };
        let state = run_expansion(ExpansionRun {
            func,
            namespace: "release: ".to_string(),
            state: StepState::default(),
            args: Vec::new(),
            definition: def.clone(),
        });
        assert!(state.error.is_none());
        let expanded = state.expanded.unwrap();
        assert!(expanded.step("release: build").is_some());
        assert_eq!(expanded.output_names().collect::<Vec<_>>(), vec!["release: built"]);
        assert!(def.step("release: build").is_none());
    }
}
