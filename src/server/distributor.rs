//! Frame distribution
//!
//! One task drains the [`FrameQueue`] every tick and fans each frame out to
//! every session. Each client send runs as its own task under the session's
//! timeout, so a stalled client delays nobody but itself.
//!
//! When the queue stays empty for `heartbeat_ticks` ticks the last frame is
//! sent again; some clients and proxies drop MJPEG connections that go
//! silent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::frame::{Frame, FrameQueue};
use crate::server::config::MIN_INTERVAL;
use crate::session::SessionSet;

#[derive(Debug)]
struct Shared {
    queue: Arc<FrameQueue>,
    sessions: Arc<SessionSet>,
    last_frame: Mutex<Option<Frame>>,
}

impl Shared {
    fn last_frame(&self) -> MutexGuard<'_, Option<Frame>> {
        self.last_frame.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Moves frames from the queue to every connected client
#[derive(Debug)]
pub struct Distributor {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Distributor {
    pub fn new(queue: Arc<FrameQueue>, sessions: Arc<SessionSet>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                sessions,
                last_frame: Mutex::new(None),
            }),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the distribution loop; no-op if already running
    pub fn start(&self, tick_interval: Duration, heartbeat_ticks: u32) {
        let tick_interval = tick_interval.max(MIN_INTERVAL);
        let mut running = self.running();
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(run_loop(
            shared,
            tick_interval,
            heartbeat_ticks.max(1),
            shutdown_rx,
        ));

        *running = Some(Running { shutdown, task });
        tracing::debug!(
            tick_ms = tick_interval.as_millis() as u64,
            heartbeat_ticks = heartbeat_ticks,
            "Distributor started"
        );
    }

    /// Whether the loop is running
    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Frame most recently taken from the queue
    pub fn last_frame(&self) -> Option<Frame> {
        self.shared.last_frame().clone()
    }

    /// Stop the loop and disconnect every session
    ///
    /// Each session receives `notify` as its final part before its socket is
    /// closed. Sends already in flight complete (or time out) first. The
    /// queue and the last frame are cleared.
    pub async fn stop(&self, notify: &Frame) {
        let running = self.running().take();
        if let Some(Running { shutdown, task }) = running {
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Distributor task failed");
            }
        }

        let sessions = self.shared.sessions.drain();
        let count = sessions.len();
        let finishing: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                let notify = notify.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.finish(&notify).await {
                        tracing::debug!(session_id = session.id(), error = %e, "Final frame not delivered");
                    }
                })
            })
            .collect();
        for handle in finishing {
            let _ = handle.await;
        }

        self.shared.queue.clear();
        *self.shared.last_frame() = None;
        tracing::debug!(clients = count, "Distributor stopped");
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    tick_interval: Duration,
    heartbeat_ticks: u32,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut idle_ticks = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        match shared.queue.pop() {
            Some(frame) => {
                idle_ticks = 0;
                *shared.last_frame() = Some(frame.clone());
                broadcast(&shared, &frame);
            }
            None => {
                idle_ticks += 1;
                if idle_ticks >= heartbeat_ticks {
                    idle_ticks = 0;
                    let last = shared.last_frame().clone();
                    if let Some(frame) = last {
                        tracing::trace!("Heartbeat resend");
                        broadcast(&shared, &frame);
                    }
                }
            }
        }
    }
}

/// Send `frame` to every session that is not busy
fn broadcast(shared: &Arc<Shared>, frame: &Frame) {
    let stats = shared.sessions.stats();

    for session in shared.sessions.snapshot() {
        let Some(permit) = session.try_begin_send() else {
            if session.is_sending() {
                stats.on_backpressure(session.id());
                tracing::trace!(session_id = session.id(), "Client busy, frame skipped");
            }
            continue;
        };

        let shared = Arc::clone(shared);
        let frame = frame.clone();
        tokio::spawn(async move {
            let id = permit.session().id();
            match permit.send(&frame, false).await {
                Ok(written) => shared.sessions.stats().on_bytes(id, written as u64),
                Err(_) => shared.sessions.teardown(id).await,
            }
        });
    }
}
