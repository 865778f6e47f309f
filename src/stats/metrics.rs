//! Statistics published for connected clients

use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

/// Per-client statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStats {
    /// Session ID
    pub id: u64,
    /// Remote peer address
    pub peer_addr: SocketAddr,
    /// Total bytes written to this client
    pub bytes_sent: u64,
    /// A frame had to be skipped because the previous send was still running
    pub slow: bool,
    /// The client has gone; kept briefly so UIs can show the departure
    pub disconnected: bool,
}

impl ClientStats {
    /// Create stats for a freshly connected client
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            bytes_sent: 0,
            slow: false,
            disconnected: false,
        }
    }
}

/// Bytes sent to all clients during one statistics tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficPoint {
    /// Wall-clock time the tick ended
    pub at: SystemTime,
    /// Bytes sent during the tick
    pub bytes: u64,
}

/// Statistics published once per tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connected and recently disconnected clients, ordered by ID
    pub clients: Vec<ClientStats>,
    /// Recent traffic, oldest first
    pub traffic: Vec<TrafficPoint>,
}

impl StatsSnapshot {
    /// Number of clients still connected
    pub fn active_clients(&self) -> usize {
        self.clients.iter().filter(|c| !c.disconnected).count()
    }

    /// Bytes sent over the whole traffic history
    pub fn total_traffic(&self) -> u64 {
        self.traffic.iter().map(|p| p.bytes).sum()
    }

    /// Outgoing bitrate of the most recent tick, in bits per second
    pub fn bitrate(&self, tick: Duration) -> u64 {
        let millis = tick.as_millis() as u64;
        match self.traffic.last() {
            Some(point) if millis > 0 => point.bytes * 8 * 1000 / millis,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000)
    }

    #[test]
    fn test_client_stats_new() {
        let stats = ClientStats::new(7, addr());
        assert_eq!(stats.id, 7);
        assert_eq!(stats.bytes_sent, 0);
        assert!(!stats.slow);
        assert!(!stats.disconnected);
    }

    #[test]
    fn test_snapshot_active_clients() {
        let mut gone = ClientStats::new(2, addr());
        gone.disconnected = true;
        let snapshot = StatsSnapshot {
            clients: vec![ClientStats::new(1, addr()), gone],
            traffic: Vec::new(),
        };

        assert_eq!(snapshot.active_clients(), 1);
    }

    #[test]
    fn test_snapshot_bitrate() {
        let at = SystemTime::UNIX_EPOCH;
        let snapshot = StatsSnapshot {
            clients: Vec::new(),
            traffic: vec![
                TrafficPoint { at, bytes: 10 },
                TrafficPoint { at, bytes: 125_000 },
            ],
        };

        // 125,000 bytes * 8 bits / 1 second = 1,000,000 bps
        assert_eq!(snapshot.bitrate(Duration::from_secs(1)), 1_000_000);
        assert_eq!(snapshot.total_traffic(), 125_010);
    }

    #[test]
    fn test_snapshot_bitrate_empty() {
        let snapshot = StatsSnapshot::default();
        assert_eq!(snapshot.bitrate(Duration::from_secs(1)), 0);
        assert_eq!(snapshot.bitrate(Duration::ZERO), 0);
    }
}
