//! Workflow definitions and the registration API.
//!
//! A `Definition` is a static description of a workflow: its parameters, its
//! steps, and the values it exposes as outputs. Steps are registered through
//! the `Builder` trait, implemented by `Definition` itself and by `Scope`,
//! which adds a name prefix (sub-definitions) or extra ordering constraints.
//!
//! Registration failures are programmer errors and panic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value as Json;

use relflow_types::workflow::Params;

use super::codec::{self, EncodedResult};
use super::context::TaskContext;
use super::dag;
use super::param::{AnyParam, ParamDef, ParamInfo};
use super::step_runner::StepError;
use super::value::{Data, Dependency, ErasedValue, StepHandle, Value, ValueType};

// ---------------------------------------------------------------------------
// Step definitions
// ---------------------------------------------------------------------------

/// What kind of step a definition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Produces a typed result.
    Task,
    /// Runs for its side effects only.
    Action,
    /// Rewrites the workflow's Definition when it runs.
    Expansion,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::Task => "task",
            StepKind::Action => "action",
            StepKind::Expansion => "expansion",
        };
        f.write_str(s)
    }
}

pub(crate) type TaskFn =
    Arc<dyn Fn(TaskContext, Vec<Json>) -> BoxFuture<'static, Result<EncodedResult, StepError>> + Send + Sync>;

pub(crate) type ExpandFn = Arc<dyn Fn(&mut Scope<'_>, Vec<Json>) -> Result<(), StepError> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum StepFn {
    Task(TaskFn),
    Expansion(ExpandFn),
}

fn task_fn<F>(f: F) -> TaskFn
where
    F: Fn(TaskContext, Vec<Json>) -> BoxFuture<'static, Result<EncodedResult, StepError>> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn expand_fn<F>(f: F) -> ExpandFn
where
    F: Fn(&mut Scope<'_>, Vec<Json>) -> Result<(), StepError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A registered step: its function, its inputs, and its ordering constraints.
pub struct StepDefinition {
    pub(crate) name: String,
    /// Prefix in effect when the step was registered; expansions register
    /// their new steps under it.
    pub(crate) namespace: String,
    pub(crate) kind: StepKind,
    pub(crate) inputs: Vec<ErasedValue>,
    pub(crate) after: BTreeSet<String>,
    pub(crate) func: StepFn,
    pub(crate) output_type: ValueType,
}

impl StepDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn output_type(&self) -> ValueType {
        self.output_type
    }

    /// Steps that must finish successfully before this one may start.
    ///
    /// Computed from the inputs each time, so aggregated inputs contribute
    /// whatever they reference now.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps: BTreeSet<String> = self.inputs.iter().flat_map(|v| v.dependencies()).collect();
        deps.extend(self.after.iter().cloned());
        deps
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dependencies", &self.dependencies())
            .field("output_type", &self.output_type)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// Static description of a workflow.
///
/// Cloning is cheap and produces an independent Definition: registering into
/// the clone never affects the original. Expansions rely on this.
#[derive(Clone, Default)]
pub struct Definition {
    pub(crate) parameters: Vec<Arc<dyn AnyParam>>,
    pub(crate) steps: BTreeMap<String, Arc<StepDefinition>>,
    pub(crate) outputs: BTreeMap<String, ErasedValue>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameter metadata in registration order.
    pub fn parameters(&self) -> Vec<ParamInfo> {
        self.parameters.iter().map(|p| p.info()).collect()
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.values().map(|s| s.as_ref())
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.get(name).map(|s| s.as_ref())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// Check the definition's graph and the parameter bindings against it.
    pub(crate) fn validate(&self, params: &Params) -> Result<(), WorkflowError> {
        dag::validate_graph(self)?;

        if let Some(step) = dag::unreferenced_steps(self).into_iter().next() {
            return Err(WorkflowError::UnusedStep(step.to_string()));
        }

        let missing: Vec<String> = self
            .parameters
            .iter()
            .filter(|p| !params.contains_key(p.name()))
            .map(|p| p.name().to_string())
            .collect();
        let mut extra: Vec<String> = params
            .keys()
            .filter(|name| !self.parameters.iter().any(|p| p.name() == name.as_str()))
            .cloned()
            .collect();
        extra.sort();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(WorkflowError::ParameterMismatch { missing, extra });
        }

        for param in &self.parameters {
            if let Some(value) = params.get(param.name()) {
                param.validate(value)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("parameters", &self.parameters.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// A registration view onto a Definition.
///
/// Names registered through a scope get its prefix, and steps registered
/// through it run after its extra dependencies.
pub struct Scope<'d> {
    def: &'d mut Definition,
    prefix: String,
    after: BTreeSet<String>,
}

impl<'d> Scope<'d> {
    pub(crate) fn new(def: &'d mut Definition, prefix: &str) -> Self {
        Self {
            def,
            prefix: prefix.to_string(),
            after: BTreeSet::new(),
        }
    }

    /// The prefix applied to names registered through this scope.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn nested(self, name: &str) -> Self {
        if name.is_empty() {
            panic!("sub-definition name must be non-empty");
        }
        let prefix = format!("{}{}: ", self.prefix, name);
        Self { prefix, ..self }
    }

    fn ordered_after(mut self, deps: &[&dyn Dependency]) -> Self {
        for dep in deps {
            self.after.extend(dep.step_names());
        }
        self
    }

    fn register_param<T: Data + Default>(&mut self, def: ParamDef<T>) -> Value<T> {
        let def = def.prepare();
        if self.def.parameters.iter().any(|p| p.name() == def.name) {
            panic!("parameter {:?} is already registered in this definition", def.name);
        }
        let value = Value::param(&def.name);
        self.def.parameters.push(Arc::new(def));
        value
    }

    fn register_output(&mut self, name: &str, value: ErasedValue) {
        if name.is_empty() {
            panic!("output name must be non-empty");
        }
        let name = self.qualify(name);
        if self.def.outputs.contains_key(&name) {
            panic!("output {name:?} is already registered in this definition");
        }
        self.def.outputs.insert(name, value);
    }

    fn register_step(
        &mut self,
        name: &str,
        kind: StepKind,
        inputs: Vec<ErasedValue>,
        func: StepFn,
        output_type: ValueType,
    ) -> String {
        if name.is_empty() {
            panic!("step name must be non-empty");
        }
        let full = self.qualify(name);
        if self.def.steps.contains_key(&full) {
            panic!("step {full:?} is already registered in this definition");
        }
        let step = StepDefinition {
            name: full.clone(),
            namespace: self.prefix.clone(),
            kind,
            inputs,
            after: self.after.clone(),
            func,
            output_type,
        };
        self.def.steps.insert(full.clone(), Arc::new(step));
        full
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

macro_rules! step_constructors {
    ($(($task:ident, $action:ident, $expand:ident $(, $arg:ident : $ty:ident)*)),* $(,)?) => {$(
        /// Register a task that produces a typed result.
        ///
        /// The step runs once every input is available. Returns a Value
        /// standing for its result.
        fn $task<T, $($ty,)* F, Fut>(&mut self, name: &str, f: F $(, $arg: &Value<$ty>)*) -> Value<T>
        where
            T: Data,
            $($ty: Data,)*
            F: Fn(TaskContext $(, $ty)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        {
            let inputs: Vec<ErasedValue> = vec![$($arg.erased()),*];
            #[allow(unused_mut, unused_variables, unused_assignments)]
            let func = task_fn(move |ctx, args| {
                let mut args = args.into_iter();
                let mut position = 0usize;
                $(
                    let $arg: $ty = match codec::decode_input(position, args.next()) {
                        Ok(v) => v,
                        Err(err) => return Box::pin(std::future::ready(Err(err))),
                    };
                    position += 1;
                )*
                let fut = f(ctx $(, $arg)*);
                Box::pin(async move {
                    let output = fut.await.map_err(StepError::Failed)?;
                    codec::encode_checked(&output)
                })
            });
            let name = self
                .scope()
                .register_step(name, StepKind::Task, inputs, StepFn::Task(func), ValueType::of::<T>());
            Value::step_result(name)
        }

        /// Register an action: a step run for its side effects.
        fn $action<$($ty,)* F, Fut>(&mut self, name: &str, f: F $(, $arg: &Value<$ty>)*) -> StepHandle
        where
            $($ty: Data,)*
            F: Fn(TaskContext $(, $ty)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        {
            let inputs: Vec<ErasedValue> = vec![$($arg.erased()),*];
            #[allow(unused_mut, unused_variables, unused_assignments)]
            let func = task_fn(move |ctx, args| {
                let mut args = args.into_iter();
                let mut position = 0usize;
                $(
                    let $arg: $ty = match codec::decode_input(position, args.next()) {
                        Ok(v) => v,
                        Err(err) => return Box::pin(std::future::ready(Err(err))),
                    };
                    position += 1;
                )*
                let fut = f(ctx $(, $arg)*);
                Box::pin(async move {
                    fut.await.map_err(StepError::Failed)?;
                    codec::encode_checked(&())
                })
            });
            let name = self
                .scope()
                .register_step(name, StepKind::Action, inputs, StepFn::Task(func), ValueType::of::<()>());
            StepHandle::new(name)
        }

        /// Register an expansion.
        ///
        /// When it runs, `f` receives a scope over a copy of the current
        /// Definition and may register new steps and outputs into it. The
        /// engine swaps the copy in once `f` returns successfully.
        fn $expand<$($ty,)* F>(&mut self, name: &str, f: F $(, $arg: &Value<$ty>)*) -> StepHandle
        where
            $($ty: Data,)*
            F: Fn(&mut Scope<'_> $(, $ty)*) -> anyhow::Result<()> + Send + Sync + 'static,
        {
            let inputs: Vec<ErasedValue> = vec![$($arg.erased()),*];
            #[allow(unused_mut, unused_variables, unused_assignments)]
            let func = expand_fn(move |scope, args| {
                let mut args = args.into_iter();
                let mut position = 0usize;
                $(
                    let $arg: $ty = codec::decode_input(position, args.next())?;
                    position += 1;
                )*
                f(scope $(, $arg)*).map_err(StepError::Failed)
            });
            let name = self.scope().register_step(
                name,
                StepKind::Expansion,
                inputs,
                StepFn::Expansion(func),
                ValueType::of::<()>(),
            );
            StepHandle::new(name)
        }
    )*};
}

/// Registration API shared by `Definition` and `Scope`.
pub trait Builder {
    /// A registration view writing into the underlying Definition.
    fn scope(&mut self) -> Scope<'_>;

    /// A scope whose step and output names are prefixed with `"<name>: "`.
    fn sub(&mut self, name: &str) -> Scope<'_> {
        self.scope().nested(name)
    }

    /// A scope whose steps additionally run after `deps`.
    fn after(&mut self, deps: &[&dyn Dependency]) -> Scope<'_> {
        self.scope().ordered_after(deps)
    }

    /// Register a parameter. Parameter names are never prefixed.
    fn param<T: Data + Default>(&mut self, def: ParamDef<T>) -> Value<T> {
        self.scope().register_param(def)
    }

    /// Expose `value` as a named output of the workflow.
    fn output<T: Data>(&mut self, name: &str, value: &Value<T>) {
        self.scope().register_output(name, value.erased())
    }

    step_constructors!(
        (task0, action0, expand0),
        (task1, action1, expand1, a1: A1),
        (task2, action2, expand2, a1: A1, a2: A2),
        (task3, action3, expand3, a1: A1, a2: A2, a3: A3),
        (task4, action4, expand4, a1: A1, a2: A2, a3: A3, a4: A4),
        (task5, action5, expand5, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5),
    );
}

impl Builder for Definition {
    fn scope(&mut self) -> Scope<'_> {
        Scope::new(self, "")
    }
}

impl Builder for Scope<'_> {
    fn scope(&mut self) -> Scope<'_> {
        Scope {
            def: &mut *self.def,
            prefix: self.prefix.clone(),
            after: self.after.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowError
// ---------------------------------------------------------------------------

/// Errors from instantiating, validating, or driving a workflow.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error("parameters do not match the definition: {}", describe_mismatch(.missing, .extra))]
    ParameterMismatch { missing: Vec<String>, extra: Vec<String> },

    #[error("parameter '{name}' must have a value of type {expected}: {reason}")]
    ParameterType {
        name: String,
        expected: String,
        reason: String,
    },

    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("step '{0}' is not referenced and should be deleted")]
    UnusedStep(String),

    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("state for step '{0}' not found")]
    MissingStepState(String),

    #[error("invalid snapshot for step '{step}': {reason}")]
    InvalidSnapshot { step: String, reason: String },

    #[error("no step named '{0}'")]
    UnknownStep(String),

    #[error("step '{0}' has not finished in failure and cannot be retried")]
    NotRetryable(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("workflow {0} is not running")]
    NotRunning(uuid::Uuid),

    #[error("evaluation error: {0}")]
    Evaluation(String),
}

fn describe_mismatch(missing: &[String], extra: &[String]) -> String {
    let quote = |names: &[String]| names.iter().map(|n| format!("'{n}'")).collect::<Vec<_>>().join(", ");
    match (missing.is_empty(), extra.is_empty()) {
        (false, false) => format!("missing {}; unknown {}", quote(missing), quote(extra)),
        (false, true) => format!("missing {}", quote(missing)),
        _ => format!("unknown {}", quote(extra)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::param::SLICE_SHORT;
    use crate::workflow::value::{constant, slice};
    use serde_json::json;

    async fn greet(_ctx: TaskContext, name: String) -> anyhow::Result<String> {
        Ok(format!("hello, {name}"))
    }

    async fn shout(_ctx: TaskContext, s: String) -> anyhow::Result<String> {
        Ok(s.to_uppercase())
    }

    async fn noop(_ctx: TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn params(pairs: &[(&str, Json)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn task_dependencies_follow_inputs() {
        let mut wd = Definition::new();
        let name = wd.param(ParamDef::<String>::new("name"));
        let greeting = wd.task1("greet", greet, &name);
        let loud = wd.task1("shout", shout, &greeting);
        wd.output("loud", &loud);

        assert!(wd.step("greet").unwrap().dependencies().is_empty());
        assert_eq!(
            wd.step("shout").unwrap().dependencies(),
            BTreeSet::from(["greet".to_string()])
        );
        assert_eq!(wd.output_names().collect::<Vec<_>>(), vec!["loud"]);
        assert_eq!(wd.step("shout").unwrap().kind(), StepKind::Task);
        assert!(wd.step("shout").unwrap().output_type().is::<String>());
    }

    #[test]
    fn after_adds_ordering_dependencies() {
        let mut wd = Definition::new();
        let first = wd.action0("first", noop);
        let second = wd.after(&[&first]).action0("second", noop);
        let _ = wd.after(&[&first, &second]).task0("third", |_ctx| async { Ok::<_, anyhow::Error>(1u8) });

        assert_eq!(
            wd.step("second").unwrap().dependencies(),
            BTreeSet::from(["first".to_string()])
        );
        assert_eq!(
            wd.step("third").unwrap().dependencies(),
            BTreeSet::from(["first".to_string(), "second".to_string()])
        );
    }

    #[test]
    fn sub_prefixes_step_and_output_names() {
        let mut wd = Definition::new();
        let name = wd.param(ParamDef::<String>::new("name"));
        let mut top = wd.sub("top");
        let mut inner = top.sub("sub1");
        let greeting = inner.task1("Greeting", greet, &name);
        inner.output("greeting", &greeting);

        assert!(wd.step("top: sub1: Greeting").is_some());
        assert_eq!(wd.output_names().collect::<Vec<_>>(), vec!["top: sub1: greeting"]);
        assert_eq!(wd.parameters()[0].name, "name");
    }

    #[test]
    fn slice_input_reports_all_elements() {
        let mut wd = Definition::new();
        let a = wd.task0("a", |_ctx| async { Ok::<_, anyhow::Error>("a".to_string()) });
        let b = wd.task0("b", |_ctx| async { Ok::<_, anyhow::Error>("b".to_string()) });
        let joined = slice(&[&a, &b]);
        let out = wd.task1("join", |_ctx, parts: Vec<String>| async move { Ok::<_, anyhow::Error>(parts.join(",")) }, &joined);
        wd.output("out", &out);

        assert_eq!(
            wd.step("join").unwrap().dependencies(),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn clone_is_independent() {
        let mut wd = Definition::new();
        let v = wd.task0("one", |_ctx| async { Ok::<_, anyhow::Error>(1u32) });
        wd.output("one", &v);

        let mut copy = wd.clone();
        let w = copy.task0("two", |_ctx| async { Ok::<_, anyhow::Error>(2u32) });
        copy.output("two", &w);

        assert_eq!(wd.steps().count(), 1);
        assert_eq!(copy.steps().count(), 2);
        assert!(wd.step("two").is_none());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_step_name_panics() {
        let mut wd = Definition::new();
        wd.action0("same", noop);
        wd.action0("same", noop);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_output_name_panics() {
        let mut wd = Definition::new();
        let v = constant(1u8);
        wd.output("x", &v);
        wd.output("x", &v);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_param_name_panics() {
        let mut wd = Definition::new();
        wd.param(ParamDef::<String>::new("name"));
        let mut sub = wd.sub("ns");
        sub.param(ParamDef::<String>::new("name"));
    }

    #[test]
    fn validate_rejects_unused_task() {
        let mut wd = Definition::new();
        let _unused = wd.task0("orphan", |_ctx| async { Ok::<_, anyhow::Error>(0i32) });
        let err = wd.validate(&Params::new()).unwrap_err();
        assert!(matches!(err, WorkflowError::UnusedStep(ref s) if s == "orphan"), "{err}");
    }

    #[test]
    fn validate_checks_parameter_bindings() {
        let mut wd = Definition::new();
        let name = wd.param(ParamDef::<String>::new("name"));
        let items = wd.param(ParamDef::<Vec<String>>::new("items (optional)").with_type(SLICE_SHORT));
        let g = wd.task1("greet", greet, &name);
        wd.output("greeting", &g);
        wd.output("items", &items);

        match wd.validate(&Params::new()) {
            Err(WorkflowError::ParameterMismatch { missing, extra }) => {
                assert_eq!(missing, vec!["name", "items (optional)"]);
                assert!(extra.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let err = wd
            .validate(&params(&[("name", json!("x")), ("other", json!([]))]))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ParameterMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "parameters do not match the definition: missing 'items (optional)'; unknown 'other'"
        );
        assert!(matches!(
            wd.validate(&params(&[("name", json!(5)), ("items (optional)", json!([]))])),
            Err(WorkflowError::ParameterType { .. })
        ));
        assert!(matches!(
            wd.validate(&params(&[("name", json!("")), ("items (optional)", json!([]))])),
            Err(WorkflowError::InvalidParameter { .. })
        ));
        assert!(
            wd.validate(&params(&[("name", json!("gopher")), ("items (optional)", json!([]))]))
                .is_ok()
        );
    }

    #[test]
    fn parameter_mismatch_names_missing_and_unknown_bindings() {
        let mut wd = Definition::new();
        let alpha = wd.param(ParamDef::<String>::new("alpha"));
        let beta = wd.param(ParamDef::<String>::new("beta"));
        wd.output("alpha", &alpha);
        wd.output("beta", &beta);

        let err = wd.validate(&params(&[("alpha", json!("a"))])).unwrap_err();
        assert!(
            matches!(err, WorkflowError::ParameterMismatch { ref missing, ref extra } if missing == &["beta"] && extra.is_empty())
        );
        assert!(err.to_string().contains("missing 'beta'"), "{err}");

        let err = wd
            .validate(&params(&[("alpha", json!("a")), ("beta", json!("b")), ("gamma", json!("c"))]))
            .unwrap_err();
        assert!(
            matches!(err, WorkflowError::ParameterMismatch { ref missing, ref extra } if missing.is_empty() && extra == &["gamma"])
        );
        assert!(err.to_string().contains("unknown 'gamma'"), "{err}");
    }

    #[test]
    fn expansions_are_exempt_from_unused_rule() {
        let mut wd = Definition::new();
        wd.expand0("plan", |_scope: &mut Scope<'_>| Ok(()));
        assert!(wd.validate(&Params::new()).is_ok());
    }

    #[test]
    fn expansion_inside_sub_remembers_namespace() {
        let mut wd = Definition::new();
        let mut sub = wd.sub("release");
        sub.expand0("plan", |_scope: &mut Scope<'_>| Ok(()));
        let step = wd.step("release: plan").unwrap();
        assert_eq!(step.namespace, "release: ");
        assert_eq!(step.kind(), StepKind::Expansion);
    }
}
