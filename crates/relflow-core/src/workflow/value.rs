//! Typed placeholders for data that does not exist until a workflow runs.
//!
//! A `Value<T>` is a handle, not data: it may name a workflow parameter, wrap
//! a constant, stand for the future result of a step, or aggregate other
//! values into a `Vec<T>`. The engine evaluates values against a running
//! workflow, always in their JSON form; the type parameter only exists so
//! that registration can check step signatures at compile time.

use std::any::TypeId;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// Capability required of every value flowing through a workflow.
///
/// Results are persisted as JSON and checked to decode back to an equal
/// value, hence `PartialEq` alongside the serde bounds.
pub trait Data: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> Data for T where T: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Send + Sync + 'static
{}

/// Static type of a value, reported for diagnostics and result tagging.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType {
    name: &'static str,
    id: TypeId,
}

impl ValueType {
    pub fn of<T: 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Erased values
// ---------------------------------------------------------------------------

/// What a value reads from when it is evaluated.
pub(crate) trait Environment {
    fn param(&self, name: &str) -> Option<&Json>;
    fn step_result(&self, step: &str) -> Option<&Json>;
}

/// Untyped value representation used by the engine.
pub(crate) trait AnyValue: Send + Sync {
    fn value_type(&self) -> ValueType;

    /// Names of the steps that must finish before this value can be read.
    fn dependencies(&self) -> BTreeSet<String>;

    fn evaluate(&self, env: &dyn Environment) -> Result<Json, WorkflowError>;

    fn describe(&self) -> String;
}

pub(crate) type ErasedValue = Arc<dyn AnyValue>;

struct ParamRef {
    name: String,
    ty: ValueType,
}

impl AnyValue for ParamRef {
    fn value_type(&self) -> ValueType {
        self.ty
    }

    fn dependencies(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn evaluate(&self, env: &dyn Environment) -> Result<Json, WorkflowError> {
        env.param(&self.name)
            .cloned()
            .ok_or_else(|| WorkflowError::Evaluation(format!("parameter '{}' is not bound", self.name)))
    }

    fn describe(&self) -> String {
        format!("param({})", self.name)
    }
}

struct Constant {
    json: Json,
    ty: ValueType,
}

impl AnyValue for Constant {
    fn value_type(&self) -> ValueType {
        self.ty
    }

    fn dependencies(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn evaluate(&self, _env: &dyn Environment) -> Result<Json, WorkflowError> {
        Ok(self.json.clone())
    }

    fn describe(&self) -> String {
        format!("const({})", self.json)
    }
}

struct StepResult {
    step: String,
    ty: ValueType,
}

impl AnyValue for StepResult {
    fn value_type(&self) -> ValueType {
        self.ty
    }

    fn dependencies(&self) -> BTreeSet<String> {
        BTreeSet::from([self.step.clone()])
    }

    fn evaluate(&self, env: &dyn Environment) -> Result<Json, WorkflowError> {
        env.step_result(&self.step).cloned().ok_or_else(|| {
            WorkflowError::Evaluation(format!("step '{}' has no result yet", self.step))
        })
    }

    fn describe(&self) -> String {
        format!("result({})", self.step)
    }
}

/// Both dependencies and evaluation are computed from the elements on
/// demand, never cached at construction.
struct SliceOf {
    elements: Vec<ErasedValue>,
    ty: ValueType,
}

impl AnyValue for SliceOf {
    fn value_type(&self) -> ValueType {
        self.ty
    }

    fn dependencies(&self) -> BTreeSet<String> {
        self.elements.iter().flat_map(|v| v.dependencies()).collect()
    }

    fn evaluate(&self, env: &dyn Environment) -> Result<Json, WorkflowError> {
        self.elements
            .iter()
            .map(|v| v.evaluate(env))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.elements.iter().map(|v| v.describe()).collect();
        format!("slice[{}]", parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Value<T>
// ---------------------------------------------------------------------------

/// A typed placeholder for data produced or consumed when the workflow runs.
pub struct Value<T> {
    inner: ErasedValue,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.inner.value_type())
            .field("source", &self.inner.describe())
            .finish()
    }
}

impl<T: 'static> Value<T> {
    fn from_erased(inner: ErasedValue) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn param(name: &str) -> Self {
        Self::from_erased(Arc::new(ParamRef {
            name: name.to_string(),
            ty: ValueType::of::<T>(),
        }))
    }

    pub(crate) fn step_result(step: String) -> Self {
        Self::from_erased(Arc::new(StepResult {
            step,
            ty: ValueType::of::<T>(),
        }))
    }

    pub(crate) fn erased(&self) -> ErasedValue {
        Arc::clone(&self.inner)
    }

    pub fn value_type(&self) -> ValueType {
        self.inner.value_type()
    }
}

/// Wrap an existing value. Constants have no dependencies.
///
/// # Panics
///
/// Panics if `value` cannot be serialized to JSON.
pub fn constant<T: Data>(value: T) -> Value<T> {
    let json = match serde_json::to_value(&value) {
        Ok(json) => json,
        Err(err) => panic!(
            "constant of type {} cannot be serialized: {err}",
            std::any::type_name::<T>()
        ),
    };
    Value::from_erased(Arc::new(Constant {
        json,
        ty: ValueType::of::<T>(),
    }))
}

/// Combine values of the same type into one `Vec<T>` value, in order.
pub fn slice<T: Data>(values: &[&Value<T>]) -> Value<Vec<T>> {
    Value::from_erased(Arc::new(SliceOf {
        elements: values.iter().map(|v| v.erased()).collect(),
        ty: ValueType::of::<Vec<T>>(),
    }))
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Anything a step can be ordered after.
pub trait Dependency {
    /// Names of the steps this dependency stands for.
    fn step_names(&self) -> BTreeSet<String>;
}

impl<T> Dependency for Value<T> {
    fn step_names(&self) -> BTreeSet<String> {
        self.inner.dependencies()
    }
}

/// Handle to a registered action or expansion.
///
/// Neither produces data, so the handle is only good for ordering other
/// steps after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepHandle {
    name: String,
}

impl StepHandle {
    pub(crate) fn new(name: String) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Dependency for StepHandle {
    fn step_names(&self) -> BTreeSet<String> {
        BTreeSet::from([self.name.clone()])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
