//! Typed workflow parameters.
//!
//! A `ParamDef<T>` declares one input of a Definition together with the
//! presentation hints a host needs to render a form for it. Bindings arrive
//! as JSON and are checked against the declaration when a workflow starts.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as Json;

use super::definition::WorkflowError;
use super::value::{Data, ValueType};

/// Suffix that marks a parameter as optional.
pub const OPTIONAL_SUFFIX: &str = "(optional)";

// ---------------------------------------------------------------------------
// ParamType
// ---------------------------------------------------------------------------

/// HTML presentation hints for a parameter of type `T`.
pub struct ParamType<T> {
    /// Element used to render the parameter, e.g. `input` or `textarea`.
    pub html_element: &'static str,
    /// `type` attribute of an `input` element.
    pub html_input_type: &'static str,
    /// Options of a `select` element.
    pub html_select_options: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ParamType<T> {
    pub const fn new(html_element: &'static str, html_input_type: &'static str) -> Self {
        Self {
            html_element,
            html_input_type,
            html_select_options: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// A drop-down with a fixed set of choices.
    pub fn select(options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            html_element: "select",
            html_input_type: "",
            html_select_options: options.into_iter().map(Into::into).collect(),
            _marker: PhantomData,
        }
    }

    fn is_unset(&self) -> bool {
        self.html_element.is_empty()
    }
}

impl<T> Default for ParamType<T> {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl<T> Clone for ParamType<T> {
    fn clone(&self) -> Self {
        Self {
            html_element: self.html_element,
            html_input_type: self.html_input_type,
            html_select_options: self.html_select_options.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ParamType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamType")
            .field("html_element", &self.html_element)
            .field("html_input_type", &self.html_input_type)
            .field("html_select_options", &self.html_select_options)
            .finish()
    }
}

/// A single-line string.
pub const BASIC_STRING: ParamType<String> = ParamType::new("input", "text");
/// A URL.
pub const URL: ParamType<String> = ParamType::new("input", "url");
/// A multi-line string.
pub const LONG_STRING: ParamType<String> = ParamType::new("textarea", "");
/// A list of short strings.
pub const SLICE_SHORT: ParamType<Vec<String>> = ParamType::new("input", "text");
/// A list of long strings.
pub const SLICE_LONG: ParamType<Vec<String>> = ParamType::new("textarea", "");
/// A checkbox.
pub const BOOL: ParamType<bool> = ParamType::new("input", "checkbox");

// ---------------------------------------------------------------------------
// ParamDef
// ---------------------------------------------------------------------------

/// Extra validation run on a bound parameter value.
pub type CheckFn<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Declaration of a workflow parameter.
pub struct ParamDef<T> {
    pub name: String,
    pub param_type: ParamType<T>,
    pub doc: String,
    pub example: String,
    pub check: Option<CheckFn<T>>,
}

impl<T> ParamDef<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: ParamType::default(),
            doc: String::new(),
            example: String::new(),
            check: None,
        }
    }

    pub fn with_type(mut self, param_type: ParamType<T>) -> Self {
        self.param_type = param_type;
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    /// Optional parameters may be bound to the zero value.
    pub fn is_optional(&self) -> bool {
        self.name.ends_with(OPTIONAL_SUFFIX)
    }
}

impl<T: Data + Default> ParamDef<T> {
    /// Fill in defaults and enforce declaration rules before registration.
    ///
    /// # Panics
    ///
    /// Panics on an empty name, on a non-string parameter without a
    /// `ParamType`, and on an optional parameter whose check rejects the
    /// zero value.
    pub(crate) fn prepare(mut self) -> Self {
        if self.name.is_empty() {
            panic!("parameter name must be non-empty");
        }
        if self.param_type.is_unset() {
            if ValueType::of::<T>().is::<String>() {
                self.param_type = ParamType::new(BASIC_STRING.html_element, BASIC_STRING.html_input_type);
            } else {
                panic!("parameter {:?} of type {} must specify a ParamType", self.name, std::any::type_name::<T>());
            }
        }
        if self.is_optional() {
            if let Some(check) = &self.check {
                if let Err(err) = check(&T::default()) {
                    panic!(
                        "parameter {:?} is optional, but its check fails on the zero value: {err}",
                        self.name
                    );
                }
            }
        }
        self
    }

    fn decode(&self, value: &Json) -> Result<T, WorkflowError> {
        serde_json::from_value(value.clone()).map_err(|err| WorkflowError::ParameterType {
            name: self.name.clone(),
            expected: std::any::type_name::<T>().to_string(),
            reason: err.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Erased parameters
// ---------------------------------------------------------------------------

/// Parameter metadata for hosts that render input forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamInfo {
    pub name: String,
    pub type_name: String,
    pub html_element: String,
    pub html_input_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub html_select_options: Vec<String>,
    pub doc: String,
    pub example: String,
    pub required: bool,
}

pub(crate) trait AnyParam: Send + Sync {
    fn name(&self) -> &str;

    fn info(&self) -> ParamInfo;

    /// Decode `value` into the declared type and apply the declaration's
    /// rules: non-zero unless optional, then the check function.
    fn validate(&self, value: &Json) -> Result<(), WorkflowError>;
}

impl<T: Data + Default> AnyParam for ParamDef<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> ParamInfo {
        ParamInfo {
            name: self.name.clone(),
            type_name: std::any::type_name::<T>().to_string(),
            html_element: self.param_type.html_element.to_string(),
            html_input_type: self.param_type.html_input_type.to_string(),
            html_select_options: self.param_type.html_select_options.clone(),
            doc: self.doc.clone(),
            example: self.example.clone(),
            required: !self.is_optional(),
        }
    }

    fn validate(&self, value: &Json) -> Result<(), WorkflowError> {
        let decoded = self.decode(value)?;
        if !self.is_optional() && decoded == T::default() {
            return Err(WorkflowError::InvalidParameter {
                name: self.name.clone(),
                reason: "must have a non-zero value".to_string(),
            });
        }
        if let Some(check) = &self.check {
            check(&decoded).map_err(|err| WorkflowError::InvalidParameter {
                name: self.name.clone(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_param_defaults_to_basic_string() {
        let p = ParamDef::<String>::new("greeting").prepare();
        assert_eq!(p.param_type.html_element, "input");
        assert_eq!(p.param_type.html_input_type, "text");
        assert!(p.info().required);
    }

    #[test]
    #[should_panic(expected = "must specify a ParamType")]
    fn non_string_param_requires_type() {
        let _ = ParamDef::<Vec<String>>::new("items").prepare();
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn empty_name_panics() {
        let _ = ParamDef::<String>::new("").prepare();
    }

    #[test]
    #[should_panic(expected = "zero value")]
    fn optional_check_must_accept_zero() {
        let _ = ParamDef::<String>::new("tag (optional)")
            .with_check(|v: &String| {
                if v.is_empty() {
                    anyhow::bail!("empty tag");
                }
                Ok(())
            })
            .prepare();
    }

    #[test]
    fn required_param_rejects_zero_value() {
        let p = ParamDef::<String>::new("greeting").prepare();
        let err = p.validate(&json!("")).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidParameter { .. }));
        assert!(p.validate(&json!("hello")).is_ok());
    }

    #[test]
    fn optional_param_accepts_zero_value() {
        let p = ParamDef::<Vec<String>>::new("reviewers (optional)")
            .with_type(SLICE_SHORT)
            .prepare();
        assert!(p.is_optional());
        assert!(!p.info().required);
        assert!(p.validate(&json!([])).is_ok());
    }

    #[test]
    fn wrong_json_type_is_rejected() {
        let p = ParamDef::<bool>::new("dry run").with_type(BOOL).prepare();
        let err = p.validate(&json!("yes")).unwrap_err();
        match err {
            WorkflowError::ParameterType { name, .. } => assert_eq!(name, "dry run"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn check_function_runs_on_bound_value() {
        let p = ParamDef::<String>::new("site")
            .with_type(URL)
            .with_check(|v: &String| {
                if !v.starts_with("https://") {
                    anyhow::bail!("must be an https URL");
                }
                Ok(())
            })
            .prepare();
        assert!(p.validate(&json!("https://example.com")).is_ok());
        let err = p.validate(&json!("ftp://example.com")).unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn select_type_lists_options() {
        let p = ParamDef::<String>::new("channel")
            .with_type(ParamType::select(["stable", "beta"]))
            .with_doc("Release channel")
            .with_example("stable")
            .prepare();
        let info = p.info();
        assert_eq!(info.html_element, "select");
        assert_eq!(info.html_select_options, vec!["stable", "beta"]);
        assert_eq!(info.doc, "Release channel");
        assert_eq!(info.example, "stable");
    }
}
