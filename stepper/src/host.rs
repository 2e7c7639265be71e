//! Host-side collaborators and a reference main loop.
//!
//! The stepper never loops on its own. A host posts ticks through
//! [`Scheduler`], executes symbolic steps and answers prompts through
//! [`Host`]. [`MainLoop`] is a single-threaded host loop suitable for the CLI
//! and for tests; workers hand steppers to it with a [`Handoff`].

use std::collections::VecDeque;

use anyhow::anyhow;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace, warn};

use crate::core::state::StepperState;
use crate::core::types::{PromptChoice, PromptRequest, StepperId};
use crate::error::StepperError;
use crate::stepper::{Current, Stepper};

/// Queue of deferred ticks.
pub trait Scheduler {
    /// Arrange for `stepper` to be advanced on a later loop iteration.
    fn post_continuation(&mut self, stepper: StepperId);
}

/// What the stepper needs from its host environment.
pub trait Host {
    /// Execute a symbolic step (e.g. a recorded key sequence).
    fn execute_symbolic(&mut self, token: &str) -> anyhow::Result<()>;

    /// Ask the user whether to run the next step (ask mode only).
    fn prompt(&mut self, request: &PromptRequest) -> PromptChoice;
}

/// Run whatever the last tick left in [`Stepper::current`].
///
/// Continuations are run until one finishes without handing out another.
/// A failing symbolic step fails the run.
pub fn dispatch_current<H: Host + ?Sized>(
    stepper: &mut Stepper,
    host: &mut H,
) -> Result<(), StepperError> {
    while let Some(current) = stepper.take_current() {
        match current {
            Current::Symbolic(token) => {
                if let Err(err) = host.execute_symbolic(&token) {
                    stepper.fail_symbolic(&token, &err);
                }
            }
            Current::Continuation(step) => stepper.run_continuation(step)?,
        }
    }
    Ok(())
}

/// Outcome of [`MainLoop::drive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveReport {
    pub ticks: u64,
    pub state: StepperState,
    /// True when the tick limit stopped the loop before the run finished.
    pub limited: bool,
}

/// Single-threaded loop that owns posted ticks.
#[derive(Debug)]
pub struct MainLoop {
    posted: VecDeque<StepperId>,
    inbox: UnboundedReceiver<Stepper>,
    outbox: UnboundedSender<Stepper>,
    max_ticks: u64,
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop {
    pub fn new() -> Self {
        let (outbox, inbox) = unbounded_channel();
        Self {
            posted: VecDeque::new(),
            inbox,
            outbox,
            max_ticks: 0,
        }
    }

    /// Stop driving after `max_ticks` ticks (`0` = unbounded).
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Sender for steppers prepared on other threads.
    pub fn handoff(&self) -> Handoff {
        Handoff {
            tx: self.outbox.clone(),
        }
    }

    /// Take a stepper submitted through a [`Handoff`], if one is waiting.
    pub fn receive(&mut self) -> Option<Stepper> {
        self.inbox.try_recv().ok()
    }

    pub fn is_posted(&self, stepper: StepperId) -> bool {
        self.posted.contains(&stepper)
    }

    /// Tick `stepper` for as long as it has posted work.
    pub fn drive<H: Host + ?Sized>(
        &mut self,
        stepper: &mut Stepper,
        host: &mut H,
    ) -> Result<DriveReport, StepperError> {
        let id = stepper.id();
        let mut ticks = 0;
        while self.take_post(id) {
            if self.max_ticks > 0 && ticks >= self.max_ticks {
                warn!(stepper = %id, ticks, "tick limit reached; leaving stepper pending");
                self.posted.push_front(id);
                return Ok(DriveReport {
                    ticks,
                    state: stepper.state(),
                    limited: true,
                });
            }
            ticks += 1;
            if stepper.advance(host)? {
                dispatch_current(stepper, host)?;
                self.post_continuation(id);
            }
        }
        debug!(stepper = %id, ticks, state = %stepper.state(), "main loop idle");
        Ok(DriveReport {
            ticks,
            state: stepper.state(),
            limited: false,
        })
    }

    fn take_post(&mut self, id: StepperId) -> bool {
        match self.posted.iter().position(|posted| *posted == id) {
            Some(index) => {
                self.posted.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Scheduler for MainLoop {
    fn post_continuation(&mut self, stepper: StepperId) {
        trace!(stepper = %stepper, "tick posted");
        self.posted.push_back(stepper);
    }
}

/// Moves a stepper from a worker thread onto the main loop.
#[derive(Debug, Clone)]
pub struct Handoff {
    tx: UnboundedSender<Stepper>,
}

impl Handoff {
    pub fn submit(&self, stepper: Stepper) -> anyhow::Result<()> {
        self.tx
            .send(stepper)
            .map_err(|_| anyhow!("main loop has shut down"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RawStep, UnitRef};
    use crate::guard::ActiveSlot;
    use crate::test_support::{ScriptedHost, StepLog};

    #[test]
    fn drive_runs_until_completion() {
        let log = StepLog::new();
        let mut main = MainLoop::new();
        let mut stepper = Stepper::with_slot(ActiveSlot::new());
        stepper
            .go([log.step("a"), log.step("b")], &mut main)
            .expect("go");
        assert!(main.is_posted(stepper.id()));

        let report = main
            .drive(&mut stepper, &mut ScriptedHost::new())
            .expect("drive");

        assert_eq!(report.state, StepperState::Completed);
        assert!(!report.limited);
        assert_eq!(report.ticks, 3);
        assert_eq!(log.entries(), vec!["a", "b"]);
        assert!(!main.is_posted(stepper.id()));
    }

    #[test]
    fn tick_limit_leaves_work_posted() {
        let mut main = MainLoop::new().with_max_ticks(1);
        let mut stepper = Stepper::with_slot(ActiveSlot::new());
        stepper.go(["Keys A", "Keys B"], &mut main).expect("go");
        let mut host = ScriptedHost::new();

        let report = main.drive(&mut stepper, &mut host).expect("drive");

        assert!(report.limited);
        assert_eq!(report.ticks, 1);
        assert_eq!(host.symbols, vec!["Keys A"]);
        assert!(main.is_posted(stepper.id()));
    }

    #[test]
    fn worker_hands_stepper_to_main_loop() {
        let mut main = MainLoop::new();
        let handoff = main.handoff();
        let slot = ActiveSlot::new();
        let worker_slot = slot.clone();

        let worker = std::thread::spawn(move || -> anyhow::Result<()> {
            let mut stepper = Stepper::with_slot(worker_slot).with_provider(
                |unit: &UnitRef| -> anyhow::Result<Vec<RawStep>> {
                    Ok(vec![RawStep::from(format!("Keys {unit}"))])
                },
            );
            stepper.add_unit("one")?;
            stepper.add_unit("two")?;
            handoff.submit(stepper)
        });
        worker.join().expect("join worker").expect("submit");

        let mut stepper = main.receive().expect("stepper handed off");
        assert!(main.receive().is_none());
        let mut host = ScriptedHost::new();
        stepper.start(&mut main).expect("start");
        let report = main.drive(&mut stepper, &mut host).expect("drive");

        assert_eq!(report.state, StepperState::Completed);
        assert_eq!(host.symbols, vec!["Keys one", "Keys two"]);
        assert_eq!(stepper.unit_count(), 2);
        assert_eq!(slot.holder(), None);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let main = MainLoop::new();
        let handoff = main.handoff();
        drop(main);
        let err = handoff
            .submit(Stepper::with_slot(ActiveSlot::new()))
            .expect_err("closed");
        assert!(err.to_string().contains("shut down"));
    }
}
