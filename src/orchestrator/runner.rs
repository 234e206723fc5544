use super::{Stage, StageError};
use crate::stopwatch::{StopwatchRegistry, TimerState};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Idle,
    Busy,
    Succeeded,
    Failed,
}

/// In-flight or settled state of one stage action.
///
/// `result` and `error_message` are never both set.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOperation<T> {
    pub status: OperationStatus,
    pub result: Option<T>,
    pub error_message: Option<String>,
    /// Final stopwatch reading of the last settled request.
    pub elapsed_display: String,
}

impl<T> Default for PipelineOperation<T> {
    fn default() -> Self {
        Self {
            status: OperationStatus::Idle,
            result: None,
            error_message: None,
            elapsed_display: String::new(),
        }
    }
}

impl<T> PipelineOperation<T> {
    pub fn busy(&self) -> bool {
        self.status == OperationStatus::Busy
    }
}

/// What a single trigger of a stage ended in.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome<T> {
    Succeeded { payload: T, elapsed: TimerState },
    Failed { message: String, elapsed: TimerState },
    /// Local validation failed; nothing was sent.
    Invalid { message: String },
    /// A request for this stage is already in flight; the trigger was ignored.
    Busy,
    /// The stage was disposed before the response arrived.
    Disposed,
}

impl<T> TriggerOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, TriggerOutcome::Succeeded { .. })
    }
}

/// Single-flight driver shared by every stage orchestrator.
///
/// Owns the stage's operation state and drives its stopwatch around each
/// request: start on issue, stop on settle, reset on dispose.
pub struct StageRunner<T> {
    stage: Stage,
    registry: Arc<StopwatchRegistry>,
    state: watch::Sender<PipelineOperation<T>>,
    disposed: CancellationToken,
}

impl<T> StageRunner<T> {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled()
    }

    /// Release the stage's stopwatch. Responses arriving afterwards are dropped.
    pub fn dispose(&self) {
        // Cancelled under the state lock so a settling request either lands
        // entirely before this or not at all.
        let first = self.state.send_if_modified(|op| {
            if self.disposed.is_cancelled() {
                return false;
            }
            self.disposed.cancel();
            if op.busy() {
                op.status = OperationStatus::Idle;
            }
            true
        });
        if !first {
            return;
        }
        self.registry.reset(self.stage.stopwatch_name());
        debug!(stage = %self.stage, "disposed");
    }

    /// Put a request that will never settle back to Idle.
    fn abandon(&self) {
        let released = self.state.send_if_modified(|op| {
            if self.disposed.is_cancelled() || !op.busy() {
                return false;
            }
            let elapsed = self.registry.stop(self.stage.stopwatch_name());
            op.status = OperationStatus::Idle;
            op.result = None;
            op.error_message = None;
            op.elapsed_display = elapsed.display_text;
            true
        });
        if released {
            warn!(stage = %self.stage, "request dropped before it settled");
        }
    }
}

/// Held while an admitted request is in flight; releases the stage if the
/// request future is dropped before it settles.
struct InFlight<'a, T> {
    runner: &'a StageRunner<T>,
    settled: bool,
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.runner.abandon();
        }
    }
}

impl<T: Clone> StageRunner<T> {
    pub fn new(stage: Stage, registry: Arc<StopwatchRegistry>) -> Self {
        let (state, _) = watch::channel(PipelineOperation::default());
        Self {
            stage,
            registry,
            state,
            disposed: CancellationToken::new(),
        }
    }

    /// Live stopwatch stream for this stage.
    pub fn timer(&self) -> watch::Receiver<TimerState> {
        self.registry.subscribe(self.stage.stopwatch_name())
    }

    /// Report a local validation failure without touching the network.
    pub fn reject(&self, message: impl Into<String>) -> TriggerOutcome<T> {
        let message = message.into();
        let applied = self.state.send_if_modified(|op| {
            if op.busy() {
                return false;
            }
            op.status = OperationStatus::Idle;
            op.result = None;
            op.error_message = Some(message.clone());
            true
        });
        if !applied {
            return TriggerOutcome::Busy;
        }
        debug!(stage = %self.stage, %message, "trigger rejected");
        TriggerOutcome::Invalid { message }
    }

    /// Issue `request` unless one is already in flight.
    ///
    /// `request` is only invoked once the stage has moved to Busy, so a
    /// rejected trigger never reaches the gateway.
    pub async fn run<F, Fut>(&self, request: F) -> TriggerOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let stopwatch = self.stage.stopwatch_name();
        let mut disposed = false;
        let admitted = self.state.send_if_modified(|op| {
            if self.disposed.is_cancelled() {
                disposed = true;
                return false;
            }
            if op.busy() {
                return false;
            }
            op.status = OperationStatus::Busy;
            op.result = None;
            op.error_message = None;
            op.elapsed_display.clear();
            self.registry.start(stopwatch);
            true
        });
        if disposed {
            return TriggerOutcome::Disposed;
        }
        if !admitted {
            debug!(stage = %self.stage, "already in flight, trigger ignored");
            return TriggerOutcome::Busy;
        }

        let mut in_flight = InFlight {
            runner: self,
            settled: false,
        };
        info!(stage = %self.stage, "request issued");

        let result = request().await;
        in_flight.settled = true;

        if let Err(err) = &result {
            warn!(stage = %self.stage, status = ?err.status(), error = %err, "request failed");
        }

        // Checked under the same lock `dispose` cancels under.
        let mut outcome = TriggerOutcome::Disposed;
        self.state.send_if_modified(|op| {
            if self.disposed.is_cancelled() {
                return false;
            }
            let elapsed = self.registry.stop(stopwatch);
            op.elapsed_display = elapsed.display_text.clone();
            outcome = match result {
                Ok(payload) => {
                    op.status = OperationStatus::Succeeded;
                    op.result = Some(payload.clone());
                    op.error_message = None;
                    TriggerOutcome::Succeeded { payload, elapsed }
                }
                Err(err) => {
                    let message = err.user_message(self.stage.fallback_message());
                    op.status = OperationStatus::Failed;
                    op.result = None;
                    op.error_message = Some(message.clone());
                    TriggerOutcome::Failed { message, elapsed }
                }
            };
            true
        });

        match &outcome {
            TriggerOutcome::Succeeded { elapsed, .. } => {
                info!(stage = %self.stage, elapsed = %elapsed.display_text, "succeeded");
            }
            TriggerOutcome::Failed { message, elapsed } => {
                info!(stage = %self.stage, %message, elapsed = %elapsed.display_text, "failed");
            }
            _ => warn!(stage = %self.stage, "response arrived after dispose, ignored"),
        }
        outcome
    }
}

/// Operation state observers for front ends that render it.
#[allow(dead_code)]
impl<T: Clone> StageRunner<T> {
    pub fn operation(&self) -> PipelineOperation<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineOperation<T>> {
        self.state.subscribe()
    }
}

impl<T> Drop for StageRunner<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
