//! In-memory engine pieces: step queue, unit loader, state machine.
//!
//! Nothing here performs I/O. The [`Stepper`](crate::stepper::Stepper)
//! facade composes these and talks to the host.

pub mod queue;
pub mod state;
pub mod types;
pub mod units;
