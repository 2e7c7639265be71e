//! Test doubles for hosts, schedulers and steps.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use tempfile::TempDir;

use crate::core::types::{Executable, PromptChoice, PromptRequest, StepOutput, StepperId};
use crate::host::{Host, Scheduler, dispatch_current};
use crate::stepper::Stepper;

/// Host that records what it is asked to do.
///
/// Prompts are answered from a script; once it runs out every prompt gets
/// [`PromptChoice::Step`].
#[derive(Debug, Default)]
pub struct ScriptedHost {
    pub symbols: Vec<String>,
    pub prompts: Vec<PromptRequest>,
    answers: VecDeque<PromptChoice>,
    refuse: Option<String>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(answers: Vec<PromptChoice>) -> Self {
        Self {
            answers: answers.into(),
            ..Self::default()
        }
    }

    /// Fail whenever `token` is executed.
    pub fn refusing(token: &str) -> Self {
        Self {
            refuse: Some(token.to_string()),
            ..Self::default()
        }
    }
}

impl Host for ScriptedHost {
    fn execute_symbolic(&mut self, token: &str) -> anyhow::Result<()> {
        if self.refuse.as_deref() == Some(token) {
            return Err(anyhow!("host refused {token}"));
        }
        self.symbols.push(token.to_string());
        Ok(())
    }

    fn prompt(&mut self, request: &PromptRequest) -> PromptChoice {
        self.prompts.push(request.clone());
        self.answers.pop_front().unwrap_or(PromptChoice::Step)
    }
}

/// Scheduler that only records posts.
#[derive(Debug, Default)]
pub struct PostLog {
    pub posts: Vec<StepperId>,
}

impl Scheduler for PostLog {
    fn post_continuation(&mut self, stepper: StepperId) {
        self.posts.push(stepper);
    }
}

/// Shared, ordered record of executed steps.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Executable step that records `name` when it runs.
    pub fn step(&self, name: &str) -> Executable {
        let log = self.clone();
        let entry = name.to_string();
        Executable::new(name, move |_| {
            log.record(entry.clone());
            Ok(StepOutput::Done)
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Executable step that always fails with `message`.
pub fn failing_step(label: &str, message: &str) -> Executable {
    let message = message.to_string();
    Executable::new(label, move |_| Err(anyhow!(message.clone())))
}

/// Tick `stepper` like a host loop until it reports no more work.
///
/// Returns the number of ticks that returned `true`.
pub fn drive(stepper: &mut Stepper, host: &mut ScriptedHost) -> usize {
    let mut ticks = 0;
    while stepper.advance(host).expect("advance refused") {
        dispatch_current(stepper, host).expect("dispatch refused");
        ticks += 1;
        assert!(ticks < 10_000, "stepper did not finish");
    }
    ticks
}

/// Temporary directory of TOML unit files.
pub struct UnitDir {
    dir: TempDir,
}

impl UnitDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `name` with `contents` and return its full path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write unit file");
        path
    }
}

impl Default for UnitDir {
    fn default() -> Self {
        Self::new()
    }
}
