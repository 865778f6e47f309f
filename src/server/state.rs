//! Server run state and stop reasons

use std::sync::atomic::{AtomicU8, Ordering};

use crate::frame::NotifyKind;

/// Lifecycle of a [`StreamServer`](crate::StreamServer)
///
/// ```text
/// Stopped ──start──► Starting ──► Running ──stop──► Stopping ──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

/// Why the server is stopping
///
/// Only selects the frame lingering clients see; teardown is the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Plain stop
    Stop,
    /// Restart after a settings change; the address is unchanged
    SettingsChanged,
    /// Restart after a PIN change; the stream moved
    PinChanged,
    /// The frame source failed
    SourceFailed,
}

impl StopReason {
    /// Placeholder shown to clients disconnected for this reason
    pub fn notify_kind(self) -> NotifyKind {
        match self {
            StopReason::Stop | StopReason::SourceFailed => NotifyKind::Idle,
            StopReason::SettingsChanged => NotifyKind::ReloadPage,
            StopReason::PinChanged => NotifyKind::NewAddress,
        }
    }
}

/// Atomic holder for [`ServerState`]
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ServerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
