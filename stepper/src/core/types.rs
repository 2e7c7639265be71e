//! Shared types for the stepping engine.
//!
//! Steps reach the engine as [`RawStep`] values (from callers or unit
//! providers) and are classified into [`StepDescriptor`]s before they enter
//! the queue. Everything here is plain data apart from [`Executable`], which
//! owns the boxed step action.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stepper::StepContext;

/// Identity of a stepper instance, as recorded by the reentrancy slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepperId(u64);

impl StepperId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StepperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stepper#{}", self.0)
    }
}

/// Opaque reference to a unit (a path or identifier understood by the
/// configured [`UnitProvider`](crate::core::units::UnitProvider)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitRef(String);

impl UnitRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UnitRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&std::path::Path> for UnitRef {
    fn from(value: &std::path::Path) -> Self {
        Self(value.display().to_string())
    }
}

/// Where a step came from, used to enrich failure reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Rust code that constructed the step.
    Code { file: &'static str, line: u32 },
    /// Position inside a loaded unit (0-based index).
    Unit { unit: UnitRef, index: usize },
    /// Position in the step queue when no better origin is known.
    Queue { index: usize },
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code { file, line } => write!(f, "{file}:{line}"),
            Self::Unit { unit, index } => write!(f, "{unit} (step {})", index + 1),
            Self::Queue { index } => write!(f, "step {}", index + 1),
        }
    }
}

type StepAction = dyn FnMut(&mut StepContext<'_>) -> anyhow::Result<StepOutput> + Send;

/// A directly executable step.
///
/// The action receives a [`StepContext`] for access to the shared data and
/// for extending the plan. Returning `Err` (or panicking) fails the run.
pub struct Executable {
    label: String,
    location: SourceLocation,
    action: Box<StepAction>,
}

impl Executable {
    /// Create a step; the caller's source position becomes its location.
    #[track_caller]
    pub fn new<F>(label: impl Into<String>, action: F) -> Self
    where
        F: FnMut(&mut StepContext<'_>) -> anyhow::Result<StepOutput> + Send + 'static,
    {
        let caller = Location::caller();
        Self {
            label: label.into(),
            location: SourceLocation::Code {
                file: caller.file(),
                line: caller.line(),
            },
            action: Box::new(action),
        }
    }

    /// Override the recorded origin (unit loaders know better than the call site).
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub(crate) fn invoke(&mut self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepOutput> {
        (self.action)(ctx)
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("label", &self.label)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// What an executable step hands back to the engine.
#[derive(Debug)]
pub enum StepOutput {
    /// Nothing to report; the next tick moves on.
    Done,
    /// Run this step on a later tick, after the host regains control
    /// (typically once a modal interaction has been opened or closed).
    Continue(Executable),
    /// Arbitrary values. Only an empty list is accepted; anything else is a
    /// structural error.
    Emitted(Vec<Value>),
}

/// A classified step sitting in the queue.
#[derive(Debug)]
pub enum StepDescriptor {
    Executable(Executable),
    /// Opaque token executed by the host (e.g. a recorded key sequence).
    Symbolic(String),
}

impl fmt::Display for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executable(exe) => f.write_str(exe.label()),
            Self::Symbolic(token) => f.write_str(token),
        }
    }
}

/// An unclassified step value as supplied by callers or unit providers.
#[derive(Debug)]
pub enum RawStep {
    Executable(Executable),
    Symbolic(String),
    /// A value of some other shape; `kind` names it for error messages.
    Other { kind: String },
}

impl RawStep {
    pub fn other(kind: impl Into<String>) -> Self {
        Self::Other { kind: kind.into() }
    }

    /// Classify into a descriptor, or describe why the value is not a step.
    pub fn classify(self) -> Result<StepDescriptor, String> {
        match self {
            Self::Executable(exe) => Ok(StepDescriptor::Executable(exe)),
            Self::Symbolic(token) => Ok(StepDescriptor::Symbolic(token)),
            Self::Other { kind } => Err(format!("invalid step: {kind}")),
        }
    }
}

impl From<Executable> for RawStep {
    fn from(value: Executable) -> Self {
        Self::Executable(value)
    }
}

impl From<&str> for RawStep {
    fn from(value: &str) -> Self {
        Self::Symbolic(value.to_string())
    }
}

impl From<String> for RawStep {
    fn from(value: String) -> Self {
        Self::Symbolic(value)
    }
}

impl From<Value> for RawStep {
    fn from(value: Value) -> Self {
        match value {
            Value::String(token) => Self::Symbolic(token),
            other => Self::other(json_kind(&other)),
        }
    }
}

/// Short type name of a JSON value for diagnostics.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Key/value store shared by all steps of the current unit.
///
/// Cleared at every unit boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Data(BTreeMap<String, Value>);

impl Data {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Host answer to an ask-mode prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    /// Run this step and ask again before the next one.
    Step,
    /// Run this step and stop asking.
    Continue,
    /// Stop the run gracefully.
    Cancel,
}

/// Text shown to the user before a step runs in ask mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub title: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_rejects_other_shapes() {
        let err = RawStep::from(json!(42)).classify().expect_err("number is not a step");
        assert_eq!(err, "invalid step: number");
    }

    #[test]
    fn strings_classify_as_symbolic() {
        let step = RawStep::from("Keys Esc").classify().expect("symbolic");
        assert!(matches!(step, StepDescriptor::Symbolic(ref token) if token == "Keys Esc"));
        assert_eq!(step.to_string(), "Keys Esc");
    }

    #[test]
    fn executable_records_call_site() {
        let exe = Executable::new("noop", |_| Ok(StepOutput::Done));
        match exe.location() {
            SourceLocation::Code { file, line } => {
                assert!(file.ends_with("types.rs"));
                assert!(*line > 0);
            }
            other => panic!("unexpected location {other:?}"),
        }
    }

    #[test]
    fn unit_location_is_one_based_in_display() {
        let location = SourceLocation::Unit {
            unit: UnitRef::new("setup.toml"),
            index: 0,
        };
        assert_eq!(location.to_string(), "setup.toml (step 1)");
    }
}
