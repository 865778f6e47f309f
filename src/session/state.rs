//! Session state machine
//!
//! Tracks a stream client from acceptance to disconnection.
//!
//! ```text
//! NotSent ──send_header──► HeaderSent ──first frame──► Streaming
//!    │                         │                           │
//!    └─────────────────────────┴─────── close ─────────────┴──► Closing ──► Closed
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

/// Session write state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepted, preamble not written yet
    NotSent,
    /// Preamble written, no frame yet
    HeaderSent,
    /// At least one frame written
    Streaming,
    /// Teardown in progress
    Closing,
    /// Socket closed
    Closed,
}

impl SessionPhase {
    /// Whether frames may still be written
    pub fn is_open(self) -> bool {
        matches!(self, SessionPhase::HeaderSent | SessionPhase::Streaming)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::NotSent,
            1 => SessionPhase::HeaderSent,
            2 => SessionPhase::Streaming,
            3 => SessionPhase::Closing,
            _ => SessionPhase::Closed,
        }
    }
}

/// Lock-free cell holding a [`SessionPhase`]
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new(phase: SessionPhase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    pub(crate) fn get(&self) -> SessionPhase {
        SessionPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; fails if the current phase is not `from`
    pub(crate) fn transition(&self, from: SessionPhase, to: SessionPhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Closing` unless already closing or closed
    ///
    /// Returns `true` for the caller that won the race.
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= SessionPhase::Closing as u8 {
                return false;
            }
            match self.0.compare_exchange(
                current,
                SessionPhase::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn set(&self, phase: SessionPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}
