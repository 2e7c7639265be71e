//! Single-resolution completion signal for `Stepper::run_async`.

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::StepperError;

pub type RunResult = Result<(), StepperError>;

/// Receiving side, handed to the caller of `run_async`.
///
/// Resolves with `Ok(())` when the run completes (a cancelled run counts as
/// completed) and with the stored error when it fails.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<RunResult>,
}

/// Sending side, owned by the stepper.
#[derive(Debug)]
pub(crate) struct CompletionSender {
    tx: Option<oneshot::Sender<RunResult>>,
}

pub(crate) fn channel() -> (CompletionSender, Completion) {
    let (tx, rx) = oneshot::channel();
    (CompletionSender { tx: Some(tx) }, Completion { rx })
}

impl CompletionSender {
    /// Resolve the signal; later calls are ignored.
    pub(crate) fn resolve(&mut self, outcome: RunResult) {
        if let Some(tx) = self.tx.take() {
            // The caller may have dropped its `Completion`; nobody to tell.
            let _ = tx.send(outcome);
        }
    }
}

impl Completion {
    /// Wait for the run to finish.
    pub async fn wait(self) -> RunResult {
        self.rx.await.unwrap_or(Err(StepperError::Abandoned))
    }

    /// Block the current thread until the run finishes.
    ///
    /// Must not be called from the thread that drives the stepper, or from
    /// inside an async runtime.
    pub fn blocking_wait(self) -> RunResult {
        self.rx.blocking_recv().unwrap_or(Err(StepperError::Abandoned))
    }

    /// The outcome if the run already finished.
    pub fn try_result(&mut self) -> Option<RunResult> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(StepperError::Abandoned)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StepperState;

    #[test]
    fn resolves_only_once() {
        let (mut tx, mut rx) = channel();
        assert_eq!(rx.try_result(), None);
        tx.resolve(Ok(()));
        tx.resolve(Err(StepperError::Finished {
            state: StepperState::Failed,
        }));
        assert_eq!(rx.try_result(), Some(Ok(())));
    }

    #[test]
    fn dropped_sender_reports_abandoned() {
        let (tx, mut rx) = channel();
        drop(tx);
        assert_eq!(rx.try_result(), Some(Err(StepperError::Abandoned)));
    }

    #[tokio::test]
    async fn wait_yields_the_failure() {
        let (mut tx, rx) = channel();
        let err = StepperError::Structural {
            message: "bad".to_string(),
            unit: None,
        };
        tx.resolve(Err(err.clone()));
        assert_eq!(rx.wait().await, Err(err));
    }
}
