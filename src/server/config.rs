//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::frame::DEFAULT_QUEUE_CAPACITY;

/// Shortest tick, timeout or stats interval the server accepts
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Server configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// JPEG quality handed to the frame source (0–100)
    pub jpeg_quality: u8,

    /// Per-client send timeout
    pub send_timeout: Duration,

    /// Time allowed for a client to send its request head
    pub request_timeout: Duration,

    /// Frames buffered between source and distributor
    pub queue_capacity: usize,

    /// Distributor tick
    pub tick_interval: Duration,

    /// Idle ticks before the last frame is sent again
    pub heartbeat_ticks: u32,

    /// Four digit PIN
    pub pin: String,

    /// Require the PIN before revealing the stream address
    pub pin_enabled: bool,

    /// Block addresses after repeated wrong PINs
    pub block_address: bool,

    /// Landing page background (0xRRGGBB)
    pub html_back_color: u32,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Stats update interval
    pub stats_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            jpeg_quality: 80,
            send_timeout: Duration::from_millis(3000),
            request_timeout: Duration::from_millis(2000),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tick_interval: Duration::from_millis(20),
            heartbeat_ticks: 40, // ~0.8 s of silence
            pin: "0000".to_string(),
            pin_enabled: false,
            block_address: false,
            html_back_color: 0x000000,
            tcp_nodelay: true,
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set JPEG quality
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.min(100);
        self
    }

    /// Set per-client send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout.max(MIN_INTERVAL);
        self
    }

    /// Set request head timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout.max(MIN_INTERVAL);
        self
    }

    /// Set frame queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set distributor tick and heartbeat threshold
    pub fn heartbeat(mut self, tick_interval: Duration, idle_ticks: u32) -> Self {
        self.tick_interval = tick_interval.max(MIN_INTERVAL);
        self.heartbeat_ticks = idle_ticks.max(1);
        self
    }

    /// Enable the PIN gate with `pin`
    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = pin.into();
        self.pin_enabled = true;
        self
    }

    /// Block addresses after repeated wrong PINs
    pub fn block_address(mut self, enabled: bool) -> Self {
        self.block_address = enabled;
        self
    }

    /// Set the landing page background
    pub fn html_back_color(mut self, rgb: u32) -> Self {
        self.html_back_color = rgb & 0x00FF_FFFF;
        self
    }

    /// Set stats interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Apply the builder limits to every field
    pub fn sanitized(self) -> Self {
        Self {
            jpeg_quality: self.jpeg_quality.min(100),
            send_timeout: self.send_timeout.max(MIN_INTERVAL),
            request_timeout: self.request_timeout.max(MIN_INTERVAL),
            queue_capacity: self.queue_capacity.max(1),
            tick_interval: self.tick_interval.max(MIN_INTERVAL),
            heartbeat_ticks: self.heartbeat_ticks.max(1),
            html_back_color: self.html_back_color & 0x00FF_FFFF,
            stats_interval: self.stats_interval.max(MIN_INTERVAL),
            ..self
        }
    }

    /// Silence after which the last frame is sent again
    pub fn heartbeat_interval(&self) -> Duration {
        self.tick_interval * self.heartbeat_ticks
    }
}
