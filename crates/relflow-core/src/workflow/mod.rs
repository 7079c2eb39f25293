//! Workflow engine core: typed definitions, concurrent execution, and durable checkpointing.
//!
//! This module contains the "brain" of the engine:
//! - `value` / `param` -- typed values and parameter declarations
//! - `definition` -- the step graph and its registration API
//! - `dag` -- reference checks, cycle detection, parallel wave computation
//! - `instance` -- a Workflow bound to parameters, with per-step state
//! - `executor` -- the run loop: readiness, launch, retry, stall, cancellation
//! - `step_runner` -- one execution of a task or an expansion
//! - `codec` -- type-tagged result serialization with round-trip checking
//! - `watchdog` / `retry` -- hung-step detection and the automatic retry budget
//! - `listener` / `checkpoint` -- the host persistence contract and its repository-backed implementation
//! - `worker` -- a supervisor running many workflows at once

pub mod checkpoint;
pub mod codec;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod instance;
pub mod listener;
pub mod param;
pub mod retry;
pub mod step_runner;
pub mod value;
pub mod watchdog;
pub mod worker;

pub use checkpoint::{CheckpointError, CheckpointListener};
pub use context::{StepLogger, TaskContext, TracingLogger};
pub use definition::{Builder, Definition, Scope, StepDefinition, StepKind, WorkflowError};
pub use instance::{Workflow, WorkflowHandle};
pub use listener::{Listener, TracingListener};
pub use param::{BASIC_STRING, BOOL, LONG_STRING, ParamDef, ParamInfo, ParamType, SLICE_LONG, SLICE_SHORT, URL};
pub use retry::RetryPolicy;
pub use step_runner::StepError;
pub use value::{Data, Dependency, StepHandle, Value, ValueType, constant, slice};
pub use worker::{Worker, WorkerError};
