//! The live set of stream clients
//!
//! The lock guards membership only. Broadcasting works on a snapshot of
//! `Arc<ClientSession>`s so no socket write ever happens under it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use super::client::ClientSession;
use crate::error::{Error, Result};
use crate::server::events::ServerEvent;
use crate::stats::StatsCollector;

#[derive(Debug)]
struct Members {
    sessions: BTreeMap<u64, Arc<ClientSession>>,
    open: bool,
}

/// Connected clients of one server
#[derive(Debug)]
pub struct SessionSet {
    members: Mutex<Members>,
    next_id: AtomicU64,
    stats: Arc<StatsCollector>,
    events: broadcast::Sender<ServerEvent>,
}

impl SessionSet {
    /// Create a closed set; call [`open`](Self::open) when the server starts
    pub fn new(stats: Arc<StatsCollector>, events: broadcast::Sender<ServerEvent>) -> Self {
        Self {
            members: Mutex::new(Members {
                sessions: BTreeMap::new(),
                open: false,
            }),
            next_id: AtomicU64::new(1),
            stats,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a session ID
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start accepting sessions
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Whether the set accepts sessions
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Add a session that has already received the stream header
    ///
    /// Fails with [`Error::ServerStopped`] once the set was drained.
    pub fn insert(&self, session: Arc<ClientSession>) -> Result<()> {
        let (id, peer_addr) = (session.id(), session.peer_addr());
        let count = {
            let mut members = self.lock();
            if !members.open {
                return Err(Error::ServerStopped);
            }
            members.sessions.insert(id, session);
            members.sessions.len()
        };

        self.stats.on_connected(id, peer_addr);
        tracing::info!(session_id = id, peer = %peer_addr, clients = count, "Client connected");
        self.notify_count(count);
        Ok(())
    }

    /// Remove a session without closing it
    pub fn remove(&self, id: u64) -> Option<Arc<ClientSession>> {
        let (removed, count) = {
            let mut members = self.lock();
            let removed = members.sessions.remove(&id);
            (removed, members.sessions.len())
        };

        if removed.is_some() {
            self.stats.on_disconnected(id);
            self.notify_count(count);
        }
        removed
    }

    /// Remove a session and close its socket
    pub async fn teardown(&self, id: u64) {
        if let Some(session) = self.remove(id) {
            session.close().await;
            tracing::debug!(session_id = id, "Client removed");
        }
    }

    /// Current members, ordered by ID
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Remove every session and refuse new ones until reopened
    pub fn drain(&self) -> Vec<Arc<ClientSession>> {
        let drained: Vec<_> = {
            let mut members = self.lock();
            members.open = false;
            std::mem::take(&mut members.sessions).into_values().collect()
        };

        for session in &drained {
            self.stats.on_disconnected(session.id());
        }
        if !drained.is_empty() {
            self.notify_count(0);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collector receiving this set's client statistics
    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    fn notify_count(&self, count: usize) {
        // No subscribers is fine
        let _ = self.events.send(ServerEvent::ClientCount(count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionPhase;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    fn set() -> (SessionSet, broadcast::Receiver<ServerEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let set = SessionSet::new(Arc::new(StatsCollector::new()), tx);
        set.open();
        (set, rx)
    }

    fn session(set: &SessionSet) -> Arc<ClientSession> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000);
        Arc::new(ClientSession::new(
            set.next_id(),
            addr,
            tokio::io::sink(),
            Duration::from_secs(1),
        ))
    }

    fn counts(rx: &mut broadcast::Receiver<ServerEvent>) -> Vec<usize> {
        let mut counts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::ClientCount(n) = event {
                counts.push(n);
            }
        }
        counts
    }

    #[tokio::test]
    async fn test_insert_and_teardown_publish_counts() {
        let (set, mut rx) = set();
        let first = session(&set);
        let second = session(&set);

        set.insert(Arc::clone(&first)).unwrap();
        set.insert(Arc::clone(&second)).unwrap();
        assert_eq!(set.len(), 2);

        set.teardown(first.id()).await;
        assert_eq!(set.len(), 1);
        assert_eq!(first.phase(), SessionPhase::Closed);

        // Unknown IDs are ignored
        set.teardown(first.id()).await;

        assert_eq!(counts(&mut rx), vec![1, 2, 1]);
    }

    #[test]
    fn test_snapshot_ordered_by_id() {
        let (set, _rx) = set();
        let sessions: Vec<_> = (0..3).map(|_| session(&set)).collect();
        for s in sessions.iter().rev() {
            set.insert(Arc::clone(s)).unwrap();
        }

        let ids: Vec<u64> = set.snapshot().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_closes_set() {
        let (set, mut rx) = set();
        set.insert(session(&set)).unwrap();

        let drained = set.drain();
        assert_eq!(drained.len(), 1);
        assert!(set.is_empty());
        assert!(!set.is_open());
        assert!(matches!(set.insert(session(&set)), Err(Error::ServerStopped)));

        assert_eq!(counts(&mut rx), vec![1, 0]);

        set.open();
        assert!(set.insert(session(&set)).is_ok());
    }

    #[test]
    fn test_stats_follow_membership() {
        let (set, _rx) = set();
        let s = session(&set);
        set.insert(Arc::clone(&s)).unwrap();
        set.remove(s.id());

        let snapshot = set.stats().tick();
        assert_eq!(snapshot.clients.len(), 1);
        assert!(snapshot.clients[0].disconnected);
    }
}
