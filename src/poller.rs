use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use crate::snapshot::SnapshotSlot;

#[derive(Debug, Clone, PartialEq)]
pub enum Polled<T> {
    Snapshot(T),
    /// The watched resource no longer exists.
    Gone,
    Failed(String),
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Unchanged,
    Stale,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub dispatched: u64,
    pub applied: u64,
    pub unchanged: u64,
    pub stale: u64,
    pub closed: u64,
    pub failed: u64,
}

struct GateState<T> {
    live: bool,
    last_seq: u64,
    slot: SnapshotSlot,
    stats: PollStats,
    sink: Box<dyn FnMut(Polled<T>) + Send>,
}

// Liveness, ordering, dedup and the sink call all happen under one lock.
struct Gate<T> {
    name: String,
    state: Mutex<GateState<T>>,
}

impl<T: Serialize> Gate<T> {
    fn apply(&self, seq: u64, polled: Polled<T>) -> ApplyOutcome {
        if matches!(polled, Polled::Nothing) {
            return ApplyOutcome::Unchanged;
        }
        let mut state = self.state.lock().expect("poll gate lock poisoned");
        if !state.live {
            state.stats.closed += 1;
            return ApplyOutcome::Closed;
        }
        if seq < state.last_seq {
            state.stats.stale += 1;
            tracing::debug!(poller = %self.name, seq, newest = state.last_seq, "stale refresh dropped");
            return ApplyOutcome::Stale;
        }
        state.last_seq = seq;
        match &polled {
            Polled::Snapshot(value) => {
                if !state.slot.offer(value) {
                    state.stats.unchanged += 1;
                    return ApplyOutcome::Unchanged;
                }
                state.stats.applied += 1;
            }
            _ => {
                // The next good snapshot is news again after a failure.
                state.slot.reset();
                state.stats.failed += 1;
            }
        }
        (state.sink)(polled);
        ApplyOutcome::Applied
    }
}

trait Liveness: Send + Sync {
    fn close(&self);
    fn is_live(&self) -> bool;
    fn mark_dispatched(&self) -> bool;
    fn stats(&self) -> PollStats;
}

impl<T: Send> Liveness for Gate<T> {
    fn close(&self) {
        let mut state = self.state.lock().expect("poll gate lock poisoned");
        state.live = false;
    }

    fn is_live(&self) -> bool {
        self.state.lock().expect("poll gate lock poisoned").live
    }

    fn mark_dispatched(&self) -> bool {
        let mut state = self.state.lock().expect("poll gate lock poisoned");
        if state.live {
            state.stats.dispatched += 1;
        }
        state.live
    }

    fn stats(&self) -> PollStats {
        self.state.lock().expect("poll gate lock poisoned").stats
    }
}

pub struct PollHandle {
    name: String,
    gate: Arc<dyn Liveness>,
    stop_tx: Option<Sender<()>>,
    timer: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn is_live(&self) -> bool {
        self.gate.is_live()
    }

    pub fn stats(&self) -> PollStats {
        self.gate.stats()
    }

    pub fn close(&mut self) {
        self.gate.close();
        drop(self.stop_tx.take());
        if let Some(timer) = self.timer.take() {
            if timer.thread().id() != thread::current().id() {
                let _ = timer.join();
            }
            tracing::debug!(poller = %self.name, "poller closed");
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Each tick runs `refresh` on its own thread. The sink runs under the
/// poller's lock and must not close its own handle.
pub fn spawn_poller<T, R, S>(
    name: impl Into<String>,
    interval: Duration,
    refresh: R,
    sink: S,
) -> PollHandle
where
    T: Serialize + Send + 'static,
    R: Fn() -> Polled<T> + Send + Sync + 'static,
    S: FnMut(Polled<T>) + Send + 'static,
{
    let name = name.into();
    let gate = Arc::new(Gate {
        name: name.clone(),
        state: Mutex::new(GateState {
            live: true,
            last_seq: 0,
            slot: SnapshotSlot::new(),
            stats: PollStats::default(),
            sink: Box::new(sink),
        }),
    });
    let refresh = Arc::new(refresh);
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let timer_gate = Arc::clone(&gate);
    let timer_name = name.clone();
    let timer = thread::Builder::new()
        .name(format!("poll-timer-{name}"))
        .spawn(move || {
            let mut seq: u64 = 0;
            loop {
                if !timer_gate.mark_dispatched() {
                    break;
                }
                seq += 1;
                let gate = Arc::clone(&timer_gate);
                let refresh = Arc::clone(&refresh);
                let job_seq = seq;
                let spawned = thread::Builder::new()
                    .name(format!("poll-{timer_name}-{job_seq}"))
                    .spawn(move || {
                        gate.apply(job_seq, refresh());
                    });
                if let Err(err) = spawned {
                    tracing::warn!(poller = %timer_name, error = %err, "failed to start refresh");
                }

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            tracing::debug!(poller = %timer_name, ticks = seq, "poll timer stopped");
        });

    let timer = match timer {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(poller = %name, error = %err, "failed to start poll timer");
            gate.close();
            None
        }
    };

    PollHandle {
        name,
        gate,
        stop_tx: Some(stop_tx),
        timer,
    }
}
