//! Cooperative step sequencing for host-driven scenarios.
//!
//! A [`Stepper`] runs an ordered list of steps (test scenarios, setup
//! scripts, macros) one per host loop iteration, so the host stays
//! responsive and can open modal UI between steps. Steps are either Rust
//! closures ([`Executable`]) or symbolic tokens the host executes itself.
//! Batches of steps come from units, loaded lazily through a
//! [`UnitProvider`](core::units::UnitProvider).
//!
//! - **[`core`]**: queue, unit loader and state machine; no I/O.
//! - **[`stepper`]**: the facade that ticks the engine.
//! - **[`host`]**: the host seams plus a reference main loop.
//! - **[`io`]**: configuration, TOML unit files, terminal host for the CLI.

pub mod completion;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod guard;
pub mod host;
pub mod io;
pub mod logging;
pub mod stepper;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::completion::{Completion, RunResult};
pub use crate::core::state::{StateChange, StepperState};
pub use crate::core::types::{
    Data, Executable, PromptChoice, PromptRequest, RawStep, SourceLocation, StepOutput,
    StepperId, UnitRef,
};
pub use crate::error::StepperError;
pub use crate::guard::ActiveSlot;
pub use crate::host::{Host, MainLoop, Scheduler};
pub use crate::stepper::{Current, StepContext, Stepper, UnitCompleted};
