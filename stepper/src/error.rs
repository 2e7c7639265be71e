//! Errors that stop a stepper run.

use thiserror::Error;

use crate::core::state::StepperState;
use crate::core::types::{SourceLocation, StepperId, UnitRef};

/// Reasons a run fails (or a call is refused).
///
/// Values are `Clone` so the same error can be stored on the stepper and
/// delivered to a waiting [`Completion`](crate::completion::Completion).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepperError {
    /// A value is not a step, or a step produced output of an unsupported shape.
    #[error("{message}\nUnit: {}", describe_unit(.unit))]
    Structural {
        message: String,
        unit: Option<UnitRef>,
    },

    /// A step returned an error or panicked.
    #[error("step failed: {message}\nAt {location}\nCode: {{{code}}}")]
    StepExecution {
        message: String,
        location: SourceLocation,
        code: String,
    },

    /// Another stepper instance is ticking.
    #[error("stepper is running, nested steppers are not allowed (held by {holder})")]
    Reentrancy { holder: StepperId },

    /// The unit provider could not produce steps.
    #[error("unit {unit} failed: {message}")]
    Provider { unit: UnitRef, message: String },

    /// The stepper already reached a terminal state.
    #[error("stepper is {state}; create a new instance for another run")]
    Finished { state: StepperState },

    /// The stepper was dropped before resolving its completion signal.
    #[error("stepper dropped before the run finished")]
    Abandoned,
}

fn describe_unit(unit: &Option<UnitRef>) -> String {
    unit.as_ref()
        .map_or_else(|| "<none>".to_string(), ToString::to_string)
}
