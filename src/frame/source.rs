//! Frame source contract
//!
//! Capture and JPEG compression are external collaborators. A source is
//! started with a [`FrameSink`] and pushes encoded frames into it for as long
//! as it runs; orientation changes and capture lifecycle stay on its side.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

use super::{Frame, FrameQueue};

/// Pure bitmap → JPEG encoding step
pub trait JpegEncoder: Send + Sync {
    /// Raw image type accepted by this encoder
    type Bitmap: ?Sized;

    /// Encode `bitmap` at `quality` (0–100)
    ///
    /// Failures should be reported as [`Error::Encode`](crate::Error::Encode).
    fn encode(&self, bitmap: &Self::Bitmap, quality: u8) -> Result<Bytes>;
}

/// Capture mechanism that periodically yields frames
pub trait FrameSource: Send {
    /// Start capturing, pushing every frame into `sink`
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop capturing; must be safe to call when not started
    fn stop(&mut self);
}

/// Producer handle feeding the server's frame queue
///
/// Obtained from [`StreamServer::frame_sink`](crate::StreamServer::frame_sink).
/// Cloning is cheap; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct FrameSink {
    queue: Arc<FrameQueue>,
    quality: u8,
    failures: mpsc::UnboundedSender<String>,
}

impl FrameSink {
    pub(crate) fn new(
        queue: Arc<FrameQueue>,
        quality: u8,
        failures: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            queue,
            quality,
            failures,
        }
    }

    /// JPEG quality the source should encode with
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Push an already encoded JPEG
    pub fn push_jpeg(&self, jpeg: impl Into<Bytes>) {
        self.queue.push(Frame::new(jpeg));
    }

    /// Encode `bitmap` with `encoder` at the configured quality and push it
    pub fn push_bitmap<E: JpegEncoder>(&self, encoder: &E, bitmap: &E::Bitmap) -> Result<()> {
        let jpeg = encoder.encode(bitmap, self.quality)?;
        self.queue.push(Frame::new(jpeg));
        Ok(())
    }

    /// Report that the source can no longer produce frames
    ///
    /// Stops the current server run and publishes
    /// [`ServerEvent::SourceFailed`](crate::ServerEvent::SourceFailed).
    pub fn report_failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "Frame source failed");
        if self.failures.send(reason).is_err() {
            tracing::debug!("Failure reported after server shutdown");
        }
    }
}
