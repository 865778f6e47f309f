//! Events published to embedders

use super::state::ServerState;
use crate::stats::StatsSnapshot;

/// Outbound notification from a running server
///
/// Delivered over a `tokio::sync::broadcast` channel; see
/// [`StreamServer::subscribe`](crate::StreamServer::subscribe). Slow
/// subscribers lose old events rather than holding the server back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Run state changed
    StateChanged(ServerState),
    /// Number of connected stream clients changed
    ClientCount(usize),
    /// Periodic client and traffic statistics
    Statistics(StatsSnapshot),
    /// The frame source failed and the server stopped itself
    SourceFailed(String),
}

/// Capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
