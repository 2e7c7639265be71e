//! Stepper lifecycle states and the transition/notification logic.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifecycle of a stepper.
///
/// `Loading -> Parsing -> Stepping` repeats once per unit; `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepperState {
    /// Created, processing not started.
    #[default]
    None,
    /// Invoking a unit to get its steps.
    Loading,
    /// Validating and inserting steps.
    Parsing,
    /// Dispatching steps.
    Stepping,
    /// All steps processed, or the run was cancelled.
    Completed,
    /// An error stopped the run.
    Failed,
}

impl StepperState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// States in which the shared data is visible to the host.
    pub fn publishes_data(self) -> bool {
        matches!(self, Self::Loading | Self::Stepping)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, to) if from == to => true,
            (Self::Completed | Self::Failed, _) => false,
            (_, Self::Completed | Self::Failed) => true,
            (Self::None, Self::Loading | Self::Parsing) => true,
            (Self::Loading, Self::Parsing) => true,
            (Self::Parsing, Self::Stepping | Self::Loading) => true,
            (Self::Stepping, Self::Loading | Self::Parsing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StepperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Loading => "loading",
            Self::Parsing => "parsing",
            Self::Stepping => "stepping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Payload of the state-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: StepperState,
    pub to: StepperState,
}

pub type StateListener = Box<dyn FnMut(StateChange) + Send>;

/// Current state plus the listeners and data-exposure flag that follow it.
#[derive(Default)]
pub struct StateMachine {
    state: StepperState,
    data_exposed: bool,
    listeners: Vec<StateListener>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StepperState {
        self.state
    }

    /// True between entering `Loading`/`Stepping` and reaching a terminal state.
    pub fn data_exposed(&self) -> bool {
        self.data_exposed
    }

    pub fn subscribe(&mut self, listener: StateListener) {
        self.listeners.push(listener);
    }

    /// Move to `next` and notify listeners.
    ///
    /// Returns `false` when nothing changed: `next` is the current state, or
    /// the machine is already terminal.
    pub fn transition(&mut self, next: StepperState) -> bool {
        if next == self.state {
            return false;
        }
        if self.state.is_terminal() {
            warn!(from = %self.state, to = %next, "ignoring transition out of terminal state");
            return false;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid stepper transition {} -> {}",
            self.state,
            next
        );

        if next.publishes_data() {
            self.data_exposed = true;
        }
        let change = StateChange {
            from: self.state,
            to: next,
        };
        self.state = next;
        debug!(from = %change.from, to = %change.to, "stepper state changed");
        for listener in &mut self.listeners {
            listener(change);
        }
        // Listeners of the terminal transition still see the data.
        if next.is_terminal() {
            self.data_exposed = false;
        }
        true
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("data_exposed", &self.data_exposed)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn terminal_states_are_never_left() {
        for terminal in [StepperState::Completed, StepperState::Failed] {
            for next in [
                StepperState::None,
                StepperState::Loading,
                StepperState::Parsing,
                StepperState::Stepping,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
        assert!(!StepperState::Completed.can_transition_to(StepperState::Failed));
    }

    #[test]
    fn unit_cycle_is_allowed() {
        let cycle = [
            StepperState::None,
            StepperState::Loading,
            StepperState::Parsing,
            StepperState::Stepping,
            StepperState::Loading,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!StepperState::None.can_transition_to(StepperState::Stepping));
    }

    #[test]
    fn transition_notifies_once_per_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut machine = StateMachine::new();
        let sink = Arc::clone(&seen);
        machine.subscribe(Box::new(move |change| {
            sink.lock().expect("lock").push(change.to);
        }));

        assert!(machine.transition(StepperState::Parsing));
        assert!(!machine.transition(StepperState::Parsing));
        assert!(machine.transition(StepperState::Stepping));
        assert!(machine.transition(StepperState::Completed));
        assert!(!machine.transition(StepperState::Loading));

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![
                StepperState::Parsing,
                StepperState::Stepping,
                StepperState::Completed
            ]
        );
    }

    #[test]
    fn data_is_published_while_active_and_retracted_at_the_end() {
        let mut machine = StateMachine::new();
        machine.transition(StepperState::Parsing);
        assert!(!machine.data_exposed());
        machine.transition(StepperState::Stepping);
        assert!(machine.data_exposed());
        machine.transition(StepperState::Failed);
        assert!(!machine.data_exposed());
    }
}
