//! The stepper: drives queued steps and units one tick at a time.
//!
//! A run is seeded with [`Stepper::go`] and [`Stepper::add_unit`] and started
//! by posting a continuation to the host's [`Scheduler`]. The host then calls
//! [`Stepper::advance`] once per loop iteration until it returns `false`,
//! running whatever [`Stepper::take_current`] hands back in between (see
//! [`crate::host::dispatch_current`]).

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, info, warn};

use crate::completion::{self, Completion, CompletionSender};
use crate::core::queue::StepQueue;
use crate::core::state::{StateChange, StateMachine, StepperState};
use crate::core::types::{
    Data, Executable, PromptChoice, PromptRequest, RawStep, SourceLocation, StepDescriptor,
    StepOutput, StepperId, UnitRef, json_kind,
};
use crate::core::units::{UnitLoader, UnitProvider};
use crate::error::StepperError;
use crate::guard::ActiveSlot;
use crate::host::{Host, Scheduler};

/// Work handed to the host by the last tick.
#[derive(Debug)]
pub enum Current {
    /// Token for the host's own execution mechanism.
    Symbolic(String),
    /// Step returned by the previous step; run it with
    /// [`Stepper::run_continuation`] when the host is ready.
    Continuation(Executable),
}

/// Payload of the unit-completed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCompleted {
    /// `None` for steps seeded directly with `go`.
    pub unit: Option<UnitRef>,
    /// Number of steps the batch held.
    pub steps: usize,
}

type UnitListener = Box<dyn FnMut(&UnitCompleted) + Send>;

/// What a running step can see and change.
pub struct StepContext<'a> {
    data: &'a mut Data,
    inserts: Vec<Vec<RawStep>>,
    units: Vec<UnitRef>,
    step_count: usize,
    unit: Option<UnitRef>,
}

impl<'a> StepContext<'a> {
    fn new(data: &'a mut Data, step_count: usize, unit: Option<UnitRef>) -> Self {
        Self {
            data,
            inserts: Vec::new(),
            units: Vec::new(),
            step_count,
            unit,
        }
    }

    pub fn data(&self) -> &Data {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut Data {
        self.data
    }

    /// Queue `steps` to run right after the current step returns, ahead of
    /// everything already pending. A later call in the same step goes first.
    pub fn go<I>(&mut self, steps: I)
    where
        I: IntoIterator,
        I::Item: Into<RawStep>,
    {
        self.inserts
            .push(steps.into_iter().map(Into::into).collect());
    }

    /// Append a unit to the end of the unit queue.
    pub fn add_unit(&mut self, unit: impl Into<UnitRef>) {
        self.units.push(unit.into());
    }

    /// Steps started so far, this one included.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn current_unit(&self) -> Option<&UnitRef> {
        self.unit.as_ref()
    }
}

enum Batch {
    /// Steps are queued; continue this tick.
    Loaded,
    /// The unit produced nothing; try the next one on the next tick.
    Empty,
    /// No units left; the run completed.
    Finished,
}

/// Invoker of steps and units.
///
/// Steps added while the run is in progress are inserted right after the
/// step that is running. An executable step that returns
/// [`StepOutput::Continue`] hands its continuation to the host, which lets
/// modal UI open before the sequence carries on.
pub struct Stepper {
    id: StepperId,
    slot: ActiveSlot,
    queue: StepQueue,
    units: UnitLoader,
    machine: StateMachine,
    data: Data,
    current: Option<Current>,
    error: Option<StepperError>,
    step_count: usize,
    ask: bool,
    posted: bool,
    cancel_requested: bool,
    completion: Option<CompletionSender>,
    unit_listeners: Vec<UnitListener>,
}

impl Default for Stepper {
    fn default() -> Self {
        Self::new()
    }
}

impl Stepper {
    /// New stepper guarded by the process-wide slot.
    pub fn new() -> Self {
        Self::with_slot(ActiveSlot::process())
    }

    pub fn with_slot(slot: ActiveSlot) -> Self {
        Self {
            id: StepperId::next(),
            slot,
            queue: StepQueue::new(),
            units: UnitLoader::new(),
            machine: StateMachine::new(),
            data: Data::default(),
            current: None,
            error: None,
            step_count: 0,
            ask: false,
            posted: false,
            cancel_requested: false,
            completion: None,
            unit_listeners: Vec::new(),
        }
    }

    pub fn with_provider<P>(mut self, provider: P) -> Self
    where
        P: UnitProvider + Send + 'static,
    {
        self.units.set_provider(Box::new(provider));
        self
    }

    pub fn id(&self) -> StepperId {
        self.id
    }

    pub fn state(&self) -> StepperState {
        self.machine.state()
    }

    /// The error that stopped the run. Unset after success and after cancel.
    pub fn error(&self) -> Option<&StepperError> {
        self.error.as_ref()
    }

    /// Steps started so far.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Units taken so far.
    pub fn unit_count(&self) -> usize {
        self.units.count()
    }

    pub fn current_unit(&self) -> Option<&UnitRef> {
        self.units.current()
    }

    pub fn current(&self) -> Option<&Current> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<Current> {
        self.current.take()
    }

    /// Steps of the current batch that have not started yet.
    pub fn pending_steps(&self) -> usize {
        self.queue.remaining()
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Data {
        &mut self.data
    }

    /// The data as published to the host: `Some` only while a run is active.
    pub fn exposed_data(&self) -> Option<&Data> {
        self.machine.data_exposed().then_some(&self.data)
    }

    pub fn ask(&self) -> bool {
        self.ask
    }

    /// Ask the host to confirm every step (troubleshooting, demonstrations).
    pub fn set_ask(&mut self, ask: bool) {
        self.ask = ask;
    }

    pub fn on_state_changed<F>(&mut self, listener: F)
    where
        F: FnMut(StateChange) + Send + 'static,
    {
        self.machine.subscribe(Box::new(listener));
    }

    pub fn on_unit_completed<F>(&mut self, listener: F)
    where
        F: FnMut(&UnitCompleted) + Send + 'static,
    {
        self.unit_listeners.push(Box::new(listener));
    }

    /// Append a unit; it is not invoked until the steps before it are done.
    pub fn add_unit(&mut self, unit: impl Into<UnitRef>) -> Result<(), StepperError> {
        self.ensure_open()?;
        let unit = unit.into();
        debug!(stepper = %self.id, unit = %unit, "unit added");
        self.units.push(unit);
        Ok(())
    }

    /// Add steps and start processing.
    ///
    /// With nothing queued the steps become the first batch and a tick is
    /// posted. Otherwise they are inserted right after the step at the
    /// cursor (the next one to run).
    pub fn go<I, S>(&mut self, steps: I, scheduler: &mut S) -> Result<(), StepperError>
    where
        I: IntoIterator,
        I::Item: Into<RawStep>,
        S: Scheduler + ?Sized,
    {
        self.slot.check(self.id)?;
        self.ensure_open()?;
        let raw: Vec<RawStep> = steps.into_iter().map(Into::into).collect();
        if self.queue.is_empty() {
            self.queue.reset();
            self.insert_or_fail(0, raw)?;
            self.post(scheduler);
        } else {
            let at = self.queue.cursor() + 1;
            self.insert_or_fail(at, raw)?;
        }
        Ok(())
    }

    /// Start processing queued units (no-op if already started).
    pub fn start<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) -> Result<(), StepperError> {
        self.slot.check(self.id)?;
        self.ensure_open()?;
        self.post(scheduler);
        Ok(())
    }

    /// [`start`](Self::start), returning a signal resolved when the run ends.
    pub fn run_async<S: Scheduler + ?Sized>(
        &mut self,
        scheduler: &mut S,
    ) -> Result<Completion, StepperError> {
        self.slot.check(self.id)?;
        self.ensure_open()?;
        let (tx, rx) = completion::channel();
        self.completion = Some(tx);
        self.post(scheduler);
        Ok(rx)
    }

    /// Stop gracefully at the next tick boundary.
    pub fn request_cancel(&mut self) {
        if !self.state().is_terminal() {
            self.cancel_requested = true;
        }
    }

    /// Process one step.
    ///
    /// Returns `Ok(true)` when more work is pending (the host should execute
    /// [`current`](Self::current) and call again), `Ok(false)` when the run
    /// is over. Run failures are recorded in [`error`](Self::error); `Err`
    /// means another stepper is ticking and nothing was touched.
    pub fn advance<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<bool, StepperError> {
        let _guard = self.slot.acquire(self.id)?;
        self.current = None;
        if self.state().is_terminal() {
            return Ok(false);
        }
        if self.cancel_requested {
            self.cancel();
            return Ok(false);
        }
        match self.tick(host) {
            Ok(more) => Ok(more),
            Err(err) => {
                self.fail(err);
                Ok(false)
            }
        }
    }

    /// Invoke a continuation handed out by [`take_current`](Self::take_current).
    ///
    /// Failures end the run like failures of ordinary steps. A continuation
    /// may itself return another continuation.
    pub fn run_continuation(&mut self, mut continuation: Executable) -> Result<(), StepperError> {
        let _guard = self.slot.acquire(self.id)?;
        if self.state().is_terminal() {
            return Ok(());
        }
        let unit = self.units.current().cloned();
        let location = continuation.location().clone();
        debug!(stepper = %self.id, label = continuation.label(), "invoking continuation");

        let mut ctx = StepContext::new(&mut self.data, self.step_count, unit.clone());
        let result = invoke_guarded(&mut continuation, &mut ctx);
        let StepContext { inserts, units, .. } = ctx;

        let outcome = match result {
            Ok(output) => {
                let at = self.queue.cursor();
                self.apply(at, inserts, units)
                    .and_then(|()| self.accept_output(output, &location, unit))
            }
            Err(message) => Err(StepperError::StepExecution {
                message,
                location,
                code: continuation.label().to_string(),
            }),
        };
        if let Err(err) = outcome {
            self.fail(err);
        }
        Ok(())
    }

    /// Fail the run because the host could not execute a symbolic step.
    pub fn fail_symbolic(&mut self, token: &str, error: &anyhow::Error) {
        let index = self.queue.cursor().saturating_sub(1);
        let location = match self.units.current() {
            Some(unit) => SourceLocation::Unit {
                unit: unit.clone(),
                index,
            },
            None => SourceLocation::Queue { index },
        };
        self.fail(StepperError::StepExecution {
            message: format!("{error:#}"),
            location,
            code: token.to_string(),
        });
    }

    fn tick<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<bool, StepperError> {
        if self.queue.is_exhausted() {
            match self.next_batch()? {
                Batch::Loaded => {}
                Batch::Empty => return Ok(true),
                Batch::Finished => return Ok(false),
            }
        }

        self.machine.transition(StepperState::Stepping);
        if self.ask && !self.confirm(host) {
            self.cancel();
            return Ok(false);
        }
        self.step_count += 1;
        self.dispatch()
    }

    /// Close the exhausted batch and load the next unit.
    fn next_batch(&mut self) -> Result<Batch, StepperError> {
        if self.units.started() || !self.queue.is_empty() {
            let event = UnitCompleted {
                unit: self.units.current().cloned(),
                steps: self.queue.len(),
            };
            info!(
                stepper = %self.id,
                unit = event.unit.as_ref().map_or("<steps>", UnitRef::as_str),
                steps = event.steps,
                "unit completed"
            );
            for listener in &mut self.unit_listeners {
                listener(&event);
            }
        }
        self.data.clear();

        let Some(unit) = self.units.advance() else {
            self.complete();
            return Ok(Batch::Finished);
        };
        self.machine.transition(StepperState::Loading);
        self.queue.reset();
        let raw = self.units.invoke(&unit)?;
        if raw.is_empty() {
            debug!(stepper = %self.id, unit = %unit, "unit produced no steps");
            return Ok(Batch::Empty);
        }
        self.insert(0, raw)?;
        Ok(Batch::Loaded)
    }

    fn confirm<H: Host + ?Sized>(&mut self, host: &mut H) -> bool {
        let Some(step) = self.queue.current() else {
            return true;
        };
        let mut text = step.to_string();
        let mut title = format!("Step {}/{}", self.queue.cursor() + 1, self.queue.len());
        if !self.units.is_empty() {
            if let Some(unit) = self.units.current() {
                text = format!("{}\n{}", unit.as_str().trim(), text);
            }
            title.push_str(&format!(" Unit {}/{}", self.units.count(), self.units.len()));
        }

        match host.prompt(&PromptRequest { title, text }) {
            PromptChoice::Step => true,
            PromptChoice::Continue => {
                self.ask = false;
                true
            }
            PromptChoice::Cancel => false,
        }
    }

    fn dispatch(&mut self) -> Result<bool, StepperError> {
        let unit = self.units.current().cloned();
        let index = self.queue.cursor();
        let exe = match self.queue.current_mut() {
            Some(StepDescriptor::Executable(exe)) => exe,
            Some(StepDescriptor::Symbolic(token)) => {
                let token = token.clone();
                self.queue.advance();
                debug!(stepper = %self.id, step = index + 1, token = %token, "posting symbolic step");
                self.current = Some(Current::Symbolic(token));
                return Ok(true);
            }
            None => {
                return Err(StepperError::Structural {
                    message: "step is missing".to_string(),
                    unit,
                });
            }
        };

        let label = exe.label().to_string();
        let location = exe.location().clone();
        debug!(stepper = %self.id, step = index + 1, label = %label, "invoking step");
        let mut ctx = StepContext::new(&mut self.data, self.step_count, unit.clone());
        let result = invoke_guarded(exe, &mut ctx);
        let StepContext { inserts, units, .. } = ctx;

        let output = result.map_err(|message| StepperError::StepExecution {
            message,
            location: location.clone(),
            code: label,
        })?;
        self.apply(index + 1, inserts, units)?;
        self.queue.advance();
        self.accept_output(output, &location, unit)
    }

    fn accept_output(
        &mut self,
        output: StepOutput,
        location: &SourceLocation,
        unit: Option<UnitRef>,
    ) -> Result<bool, StepperError> {
        match output {
            StepOutput::Done => Ok(true),
            StepOutput::Emitted(values) => match values.first() {
                None => Ok(true),
                Some(first) => Err(StepperError::Structural {
                    message: format!(
                        "unexpected step output at {location}: {} item(s): [{}]...",
                        values.len(),
                        json_kind(first)
                    ),
                    unit,
                }),
            },
            StepOutput::Continue(next) => {
                debug!(stepper = %self.id, label = next.label(), "handing continuation to host");
                self.current = Some(Current::Continuation(next));
                Ok(true)
            }
        }
    }

    /// Apply what a step queued through its context.
    fn apply(
        &mut self,
        at: usize,
        inserts: Vec<Vec<RawStep>>,
        units: Vec<UnitRef>,
    ) -> Result<(), StepperError> {
        for batch in inserts {
            self.insert(at, batch)?;
        }
        for unit in units {
            debug!(stepper = %self.id, unit = %unit, "unit added by step");
            self.units.push(unit);
        }
        Ok(())
    }

    fn insert(&mut self, at: usize, raw: Vec<RawStep>) -> Result<usize, StepperError> {
        self.machine.transition(StepperState::Parsing);
        let steps = raw
            .into_iter()
            .map(RawStep::classify)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|message| StepperError::Structural {
                message,
                unit: self.units.current().cloned(),
            })?;
        let count = self.queue.insert_at(at, steps);
        debug!(stepper = %self.id, at, count, "steps inserted");
        Ok(count)
    }

    fn insert_or_fail(&mut self, at: usize, raw: Vec<RawStep>) -> Result<(), StepperError> {
        match self.insert(at, raw) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn post<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) {
        if self.posted {
            return;
        }
        self.posted = true;
        debug!(stepper = %self.id, "posting first tick");
        scheduler.post_continuation(self.id);
    }

    fn ensure_open(&self) -> Result<(), StepperError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(StepperError::Finished { state });
        }
        Ok(())
    }

    fn complete(&mut self) {
        info!(
            stepper = %self.id,
            steps = self.step_count,
            units = self.units.count(),
            "stepper completed"
        );
        self.finish(StepperState::Completed, Ok(()));
    }

    fn cancel(&mut self) {
        self.cancel_requested = false;
        info!(stepper = %self.id, steps = self.step_count, "stepper cancelled");
        self.finish(StepperState::Completed, Ok(()));
    }

    fn fail(&mut self, err: StepperError) {
        if self.state().is_terminal() {
            return;
        }
        warn!(stepper = %self.id, error = %err, "stepper failed");
        self.error = Some(err.clone());
        self.finish(StepperState::Failed, Err(err));
    }

    fn finish(&mut self, state: StepperState, outcome: Result<(), StepperError>) {
        self.machine.transition(state);
        if let Some(mut tx) = self.completion.take() {
            tx.resolve(outcome);
        }
    }
}

impl fmt::Debug for Stepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stepper")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("queue", &self.queue)
            .field("units", &self.units)
            .field("step_count", &self.step_count)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

fn invoke_guarded(exe: &mut Executable, ctx: &mut StepContext<'_>) -> Result<StepOutput, String> {
    match catch_unwind(AssertUnwindSafe(|| exe.invoke(ctx))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
