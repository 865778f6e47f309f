//! Streaming server
//!
//! [`StreamServer`] ties the pieces together: the accept loop routes each
//! connection, stream requests become sessions, and the [`Distributor`]
//! feeds them from the frame queue.

pub mod config;
pub(crate) mod connection;
pub mod distributor;
pub mod events;
pub mod listener;
pub mod state;

pub use config::ServerConfig;
pub use distributor::Distributor;
pub use events::ServerEvent;
pub use listener::StreamServer;
pub use state::{ServerState, StopReason};
