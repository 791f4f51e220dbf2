//! Async driver for a [`Synchronizer`].
//!
//! Subscribes to every input timeline and runs a cycle either on each push
//! (event mode) or on a fixed-rate timer when at least one push arrived since
//! the previous tick (timer mode). A `Cleared` notification resets the
//! synchronizer.

use std::time::Duration;

use contracts::{SyncOutcome, TimelineEvent, TimelineId};
use metrics::counter;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::Synchronizer;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Notification forwarded from one input
#[derive(Debug)]
enum Signal {
    Pushed,
    Cleared(TimelineId),
    Lagged(TimelineId, u64),
}

/// Background synchronization task
pub struct SyncWorker {
    synchronizer: Synchronizer,
    reports: mpsc::Sender<SyncOutcome>,
}

impl SyncWorker {
    /// Every cycle outcome, skipped ones included, is sent on `reports`.
    pub fn new(synchronizer: Synchronizer, reports: mpsc::Sender<SyncOutcome>) -> Self {
        Self {
            synchronizer,
            reports,
        }
    }

    /// Subscribe to the inputs and start the task.
    ///
    /// Subscriptions are taken before this returns, so nothing pushed afterwards is missed.
    pub fn spawn(self) -> SyncWorkerHandle {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let forwarders = self
            .synchronizer
            .inputs()
            .iter()
            .map(|input| forward(input.name().clone(), input.subscribe(), signal_tx.clone()))
            .collect();
        drop(signal_tx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(signal_rx, shutdown_rx));

        SyncWorkerHandle {
            shutdown: shutdown_tx,
            join,
            forwarders,
        }
    }

    #[instrument(name = "sync_worker", skip_all, fields(output = %self.synchronizer.output().name()))]
    async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<Signal>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Synchronizer {
        let Self {
            mut synchronizer,
            reports,
        } = self;
        let period = synchronizer
            .config()
            .framerate_hz
            .map(|hz| Duration::from_secs_f64(1.0 / hz).max(MIN_PERIOD));
        let mut ticker = period.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut pending = false;

        info!(
            inputs = synchronizer.inputs().len(),
            timer_ms = ?period.map(|p| p.as_secs_f64() * 1000.0),
            "sync worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                signal = signals.recv() => {
                    let Some(signal) = signal else {
                        debug!("every input closed");
                        break;
                    };
                    match signal {
                        Signal::Pushed => {
                            if ticker.is_some() {
                                pending = true;
                            } else {
                                let (next, keep) = cycle(synchronizer, &reports).await;
                                synchronizer = next;
                                if !keep {
                                    break;
                                }
                            }
                        }
                        Signal::Cleared(timeline) => {
                            debug!(timeline = %timeline, "input cleared");
                            synchronizer.reset();
                            pending = false;
                        }
                        Signal::Lagged(timeline, skipped) => {
                            warn!(timeline = %timeline, skipped, "sync worker fell behind input notifications");
                            counter!("tlsync_worker_lagged_total", "timeline" => timeline.to_string())
                                .increment(skipped);
                            pending = true;
                            if ticker.is_none() {
                                let (next, keep) = cycle(synchronizer, &reports).await;
                                synchronizer = next;
                                if !keep {
                                    break;
                                }
                            }
                        }
                    }
                }
                _ = tick(&mut ticker) => {
                    if pending {
                        pending = false;
                        let (next, keep) = cycle(synchronizer, &reports).await;
                        synchronizer = next;
                        if !keep {
                            break;
                        }
                    }
                }
            }
        }

        info!(frames = synchronizer.frame_id(), "sync worker stopped");
        synchronizer
    }
}

/// Run one cycle on the blocking pool and report it.
///
/// Locking a spilled input reads it back from disk, so the cycle never runs
/// on a runtime thread. The flag is `false` once nobody listens anymore.
async fn cycle(
    mut synchronizer: Synchronizer,
    reports: &mpsc::Sender<SyncOutcome>,
) -> (Synchronizer, bool) {
    let joined = tokio::task::spawn_blocking(move || {
        let result = synchronizer.synchronize();
        (synchronizer, result)
    })
    .await;
    let (synchronizer, result) = match joined {
        Ok(done) => done,
        Err(e) => match e.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            // only cancelled while the runtime shuts down, which drops this task too
            Err(_) => std::future::pending().await,
        },
    };

    let keep = match result {
        Ok(outcome) => reports.send(outcome).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "synchronization cycle failed");
            true
        }
    };
    (synchronizer, keep)
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn forward(
    timeline: TimelineId,
    mut events: broadcast::Receiver<TimelineEvent>,
    signals: mpsc::UnboundedSender<Signal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let signal = match events.recv().await {
                Ok(TimelineEvent::Pushed(_)) => Signal::Pushed,
                Ok(TimelineEvent::Cleared) => Signal::Cleared(timeline.clone()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Signal::Lagged(timeline.clone(), skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if signals.send(signal).is_err() {
                break;
            }
        }
    })
}

/// Handle to a running [`SyncWorker`]
pub struct SyncWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<Synchronizer>,
    forwarders: Vec<JoinHandle<()>>,
}

impl SyncWorkerHandle {
    /// Ask the worker to stop after the current cycle
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the worker and get the synchronizer back
    pub async fn stop(self) -> Result<Synchronizer, tokio::task::JoinError> {
        self.shutdown();
        let result = self.join.await;
        for forwarder in self.forwarders {
            forwarder.abort();
        }
        result
    }
}
