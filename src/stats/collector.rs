//! Statistics collection
//!
//! Sessions report connects, disconnects, skipped frames and bytes written.
//! Once per stats interval the collector folds the byte counter into the
//! traffic history, expires departed clients and publishes a snapshot.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::broadcast;

use super::metrics::{ClientStats, StatsSnapshot, TrafficPoint};
use crate::server::config::MIN_INTERVAL;
use crate::server::events::ServerEvent;

/// How long a disconnected client stays in snapshots
pub const DISCONNECTED_HOLD: Duration = Duration::from_secs(5);

/// Span of the traffic history
pub const TRAFFIC_HISTORY: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Tracked {
    stats: ClientStats,
    disconnected_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    clients: BTreeMap<u64, Tracked>,
    pending_bytes: u64,
    traffic: VecDeque<TrafficPoint>,
}

/// Aggregates per-client counters between ticks
#[derive(Debug, Default)]
pub struct StatsCollector {
    inner: Mutex<Inner>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A client started streaming
    pub fn on_connected(&self, id: u64, peer_addr: SocketAddr) {
        self.lock().clients.insert(
            id,
            Tracked {
                stats: ClientStats::new(id, peer_addr),
                disconnected_at: None,
            },
        );
    }

    /// A client went away
    pub fn on_disconnected(&self, id: u64) {
        self.on_disconnected_at(id, Instant::now());
    }

    fn on_disconnected_at(&self, id: u64, now: Instant) {
        if let Some(tracked) = self.lock().clients.get_mut(&id) {
            if tracked.disconnected_at.is_none() {
                tracked.stats.disconnected = true;
                tracked.disconnected_at = Some(now);
            }
        }
    }

    /// A frame was skipped for `id` because its previous send was in flight
    pub fn on_backpressure(&self, id: u64) {
        if let Some(tracked) = self.lock().clients.get_mut(&id) {
            tracked.stats.slow = true;
        }
    }

    /// `bytes` were written to `id`
    pub fn on_bytes(&self, id: u64, bytes: u64) {
        let mut inner = self.lock();
        inner.pending_bytes += bytes;
        if let Some(tracked) = inner.clients.get_mut(&id) {
            tracked.stats.bytes_sent += bytes;
        }
    }

    /// Close the current tick and return the resulting snapshot
    pub fn tick(&self) -> StatsSnapshot {
        self.tick_at(Instant::now(), SystemTime::now())
    }

    fn tick_at(&self, now: Instant, wall: SystemTime) -> StatsSnapshot {
        let mut inner = self.lock();

        inner.clients.retain(|_, tracked| match tracked.disconnected_at {
            Some(at) => now.saturating_duration_since(at) < DISCONNECTED_HOLD,
            None => true,
        });

        let bytes = std::mem::take(&mut inner.pending_bytes);
        inner.traffic.push_back(TrafficPoint { at: wall, bytes });
        if let Some(horizon) = wall.checked_sub(TRAFFIC_HISTORY) {
            while inner.traffic.front().map_or(false, |p| p.at < horizon) {
                inner.traffic.pop_front();
            }
        }

        StatsSnapshot {
            clients: inner.clients.values().map(|t| t.stats.clone()).collect(),
            traffic: inner.traffic.iter().copied().collect(),
        }
    }

    /// Forget all clients and traffic
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.clients.clear();
        inner.traffic.clear();
        inner.pending_bytes = 0;
    }

    /// Spawn a task publishing a snapshot every `interval`
    ///
    /// Runs until the returned handle is aborted.
    pub fn spawn_stats_task(
        self: &Arc<Self>,
        interval: Duration,
        events: broadcast::Sender<ServerEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let collector = Arc::clone(self);
        let interval = interval.max(MIN_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = collector.tick();
                // No subscribers is fine
                let _ = events.send(ServerEvent::Statistics(snapshot));
            }
        })
    }
}
