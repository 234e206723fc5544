//! Named stopwatches with live state streams.
//!
//! Every pipeline stage owns one stopwatch by name. While a stopwatch runs, a
//! background producer publishes its elapsed time at a fixed cadence so the
//! presentation layer can render a live counter. Subscribers get the latest
//! state immediately and every change after that.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cadence of live updates while a stopwatch runs.
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Snapshot of one stopwatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub running: bool,
    pub elapsed_ms: f64,
    pub display_text: String,
}

impl TimerState {
    /// State of a stopwatch that was never started or has been reset.
    pub fn zero() -> Self {
        Self {
            running: false,
            elapsed_ms: 0.0,
            display_text: "0.000s".to_string(),
        }
    }

    fn measured(running: bool, elapsed_ms: f64) -> Self {
        Self {
            running,
            elapsed_ms,
            display_text: format_elapsed(elapsed_ms),
        }
    }
}

impl Default for TimerState {
    fn default() -> Self {
        Self::zero()
    }
}

/// Render elapsed milliseconds the way the stage status lines show them.
///
/// Under a second prints whole milliseconds (`"500ms"`), under a minute prints
/// seconds with three decimals (`"1.500s"`), anything longer prints minutes and
/// seconds with one decimal (`"1m 5.0s"`).
pub fn format_elapsed(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.3}s", ms / 1000.0)
    } else {
        let minutes = (ms / 60_000.0).floor() as u64;
        let seconds = (ms % 60_000.0) / 1000.0;
        format!("{}m {:.1}s", minutes, seconds)
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

struct Slot {
    started_at: Option<Instant>,
    producer: Option<CancellationToken>,
    state: watch::Sender<TimerState>,
    emitted: u64,
}

impl Slot {
    fn new() -> Self {
        let (state, _) = watch::channel(TimerState::zero());
        Self {
            started_at: None,
            producer: None,
            state,
            emitted: 0,
        }
    }
}

struct Shared {
    slots: Mutex<HashMap<String, Slot>>,
    live: AtomicUsize,
    tick: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts a producer task as live from spawn until the task is dropped.
struct LiveProducer(Arc<Shared>);

impl LiveProducer {
    fn register(shared: &Arc<Shared>) -> Self {
        shared.live.fetch_add(1, Ordering::SeqCst);
        Self(shared.clone())
    }
}

impl Drop for LiveProducer {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Process-wide set of stopwatches keyed by stage name.
///
/// Slots are created lazily on first reference. `start` spawns a tokio task,
/// so it must be called from within a runtime.
pub struct StopwatchRegistry {
    shared: Arc<Shared>,
}

impl StopwatchRegistry {
    pub fn new(tick: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                live: AtomicUsize::new(0),
                tick: tick.max(Duration::from_millis(1)),
            }),
        }
    }

    /// Start (or restart) the stopwatch for `name`.
    ///
    /// Any producer already running for `name` is cancelled before the new one
    /// is installed.
    pub fn start(&self, name: &str) {
        let token = CancellationToken::new();
        let started_at = Instant::now();
        {
            let mut slots = self.shared.lock();
            let slot = slots.entry(name.to_string()).or_insert_with(Slot::new);
            if let Some(prior) = slot.producer.take() {
                prior.cancel();
                debug!(stopwatch = name, "superseded running producer");
            }
            slot.started_at = Some(started_at);
            slot.producer = Some(token.clone());
            slot.state.send_replace(TimerState::measured(true, 0.0));
        }

        debug!(stopwatch = name, "started");
        let live = LiveProducer::register(&self.shared);
        tokio::spawn(run_producer(live, name.to_string(), token, started_at));
    }

    /// Stop the stopwatch and return its final state.
    ///
    /// Stopping a stopwatch that is not running leaves it untouched and returns
    /// its current state, which is the zero state if it never ran.
    pub fn stop(&self, name: &str) -> TimerState {
        let mut slots = self.shared.lock();
        let Some(slot) = slots.get_mut(name) else {
            return TimerState::zero();
        };
        let Some(producer) = slot.producer.take() else {
            return slot.state.borrow().clone();
        };
        producer.cancel();

        let elapsed = slot.started_at.map(elapsed_ms).unwrap_or(0.0);
        let final_state = TimerState::measured(false, elapsed);
        slot.state.send_replace(final_state.clone());
        debug!(stopwatch = name, elapsed = %final_state.display_text, "stopped");
        final_state
    }

    /// Return the stopwatch to its initial state, cancelling any producer.
    pub fn reset(&self, name: &str) {
        let mut slots = self.shared.lock();
        let Some(slot) = slots.get_mut(name) else {
            return;
        };
        if let Some(producer) = slot.producer.take() {
            producer.cancel();
        }
        slot.started_at = None;
        slot.state.send_replace(TimerState::zero());
        debug!(stopwatch = name, "reset");
    }

    /// Live stream of state changes for `name`.
    ///
    /// The receiver is marked changed so the first `changed().await` resolves
    /// immediately with the current state.
    pub fn subscribe(&self, name: &str) -> watch::Receiver<TimerState> {
        let mut slots = self.shared.lock();
        let slot = slots.entry(name.to_string()).or_insert_with(Slot::new);
        let mut rx = slot.state.subscribe();
        rx.mark_changed();
        rx
    }

    /// Number of producer tasks that have not exited yet.
    pub fn live_producers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Cancel every producer and zero every stopwatch.
    pub fn shutdown(&self) {
        let mut slots = self.shared.lock();
        for slot in slots.values_mut() {
            if let Some(producer) = slot.producer.take() {
                producer.cancel();
            }
            slot.started_at = None;
            slot.state.send_replace(TimerState::zero());
        }
    }

    #[cfg(test)]
    fn emitted(&self, name: &str) -> u64 {
        self.shared.lock().get(name).map_or(0, |slot| slot.emitted)
    }
}

/// Point-in-time reads for front ends that poll instead of subscribing.
#[allow(dead_code)]
impl StopwatchRegistry {
    pub fn snapshot(&self, name: &str) -> TimerState {
        self.shared
            .lock()
            .get(name)
            .map(|slot| slot.state.borrow().clone())
            .unwrap_or_default()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.shared
            .lock()
            .get(name)
            .is_some_and(|slot| slot.producer.is_some())
    }
}

impl Default for StopwatchRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl Drop for StopwatchRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_producer(
    live: LiveProducer,
    name: String,
    token: CancellationToken,
    started_at: Instant,
) {
    let shared = live.0.clone();
    let mut ticker = tokio::time::interval(shared.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if !publish(&shared, &name, &token, started_at) {
                    break;
                }
            }
        }
    }
    debug!(stopwatch = %name, "producer exited");
    drop(live);
}

/// Publish one live update. Returns false once the producer should exit.
fn publish(shared: &Shared, name: &str, token: &CancellationToken, started_at: Instant) -> bool {
    let mut slots = shared.lock();
    // start/stop/reset cancel while holding this lock, so a superseded
    // producer can never publish after its replacement.
    if token.is_cancelled() {
        return false;
    }
    let Some(slot) = slots.get_mut(name) else {
        return false;
    };
    slot.state
        .send_replace(TimerState::measured(true, elapsed_ms(started_at)));
    slot.emitted += 1;
    true
}
