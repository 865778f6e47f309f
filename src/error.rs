//! Error types
//!
//! A single error enum covers startup, per-client I/O and frame source
//! failures. Per-client errors never escape the connection they belong to.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for server, session and source operations
#[derive(Debug)]
pub enum Error {
    /// `start()` was called while the server is not stopped
    AlreadyRunning,
    /// The listening port is already taken
    PortInUse(SocketAddr),
    /// Binding or configuring the listener failed for another reason
    Startup(io::Error),
    /// I/O failure on a single connection
    Io(io::Error),
    /// A client send did not complete within the configured timeout
    SendTimeout(Duration),
    /// A previous send to this session has not completed yet
    SendInProgress,
    /// The session is closing or already closed
    SessionClosed,
    /// The MJPEG preamble was already written to this session
    HeaderAlreadySent,
    /// PIN is not exactly four ASCII digits
    InvalidPin(String),
    /// The JPEG encoder rejected a bitmap
    Encode(String),
    /// The frame source cannot produce frames anymore
    SourceFailed(String),
    /// The server run this handle belonged to has ended
    ServerStopped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyRunning => write!(f, "Server is already running"),
            Error::PortInUse(addr) => write!(f, "Address already in use: {}", addr),
            Error::Startup(e) => write!(f, "Server startup failed: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::SendTimeout(timeout) => {
                write!(f, "Client send timed out after {} ms", timeout.as_millis())
            }
            Error::SendInProgress => write!(f, "Previous send still in progress"),
            Error::SessionClosed => write!(f, "Session closed"),
            Error::HeaderAlreadySent => write!(f, "Stream header already sent"),
            Error::InvalidPin(pin) => write!(f, "Invalid PIN (expected 4 digits): {:?}", pin),
            Error::Encode(reason) => write!(f, "JPEG encoding failed: {}", reason),
            Error::SourceFailed(reason) => write!(f, "Frame source failed: {}", reason),
            Error::ServerStopped => write!(f, "Server stopped"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Startup(e) | Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
