//! Encoded frames and the buffers that carry them
//!
//! Frames flow from an external capture source through the encoder into the
//! bounded [`FrameQueue`], and from there to every connected client.
//!
//! ```text
//!  FrameSource ──► JpegEncoder ──► FrameSink::push ──► FrameQueue
//!                                                        │ pop (every tick)
//!                                                        ▼
//!                                                   Distributor ──► ClientSession × N
//! ```
//!
//! # Zero-Copy Design
//!
//! [`Frame`] wraps `bytes::Bytes`, so handing the same JPEG to many clients
//! only bumps a reference count.

pub mod notify;
pub mod queue;
pub mod source;

use bytes::Bytes;

pub use notify::{NotifyFrameGenerator, NotifyKind, StaticNotifyFrames};
pub use queue::{FrameQueue, DEFAULT_QUEUE_CAPACITY};
pub use source::{FrameSink, FrameSource, JpegEncoder};

/// An immutable JPEG-encoded image
///
/// Cheap to clone; the payload is never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Create a frame from encoded JPEG bytes
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Create a frame from a static byte slice without copying
    pub fn from_static(data: &'static [u8]) -> Self {
        Self {
            data: Bytes::from_static(data),
        }
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a shared handle to the encoded bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clone_shares_data() {
        let frame = Frame::new(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let copy = frame.clone();

        assert_eq!(frame.len(), 4);
        assert_eq!(copy.as_bytes().as_ptr(), frame.as_bytes().as_ptr());
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::from_static(&[]);
        assert!(frame.is_empty());
    }
}
