//! Placeholder frames shown to clients at lifecycle boundaries
//!
//! Rendering the placeholder images is the embedder's job. The server only
//! asks for one of a handful of kinds when it starts, stops or restarts.

use super::Frame;

/// Which placeholder image to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    /// Idle/default screen, shown before the first real frame and on plain stop
    Idle,
    /// Settings changed and the stream moved: go to the new address
    NewAddress,
    /// Settings changed: reload the page
    ReloadPage,
}

/// Source of pre-rendered placeholder JPEGs
pub trait NotifyFrameGenerator: Send + Sync + 'static {
    /// Return the encoded placeholder for `kind`
    fn notify_frame(&self, kind: NotifyKind) -> Frame;
}

/// Generator backed by three fixed JPEGs
#[derive(Debug, Clone)]
pub struct StaticNotifyFrames {
    idle: Frame,
    new_address: Frame,
    reload_page: Frame,
}

impl StaticNotifyFrames {
    /// Create a generator with one frame per kind
    pub fn new(idle: Frame, new_address: Frame, reload_page: Frame) -> Self {
        Self {
            idle,
            new_address,
            reload_page,
        }
    }

    /// Use the same frame for every kind
    pub fn uniform(frame: Frame) -> Self {
        Self::new(frame.clone(), frame.clone(), frame)
    }
}

impl NotifyFrameGenerator for StaticNotifyFrames {
    fn notify_frame(&self, kind: NotifyKind) -> Frame {
        match kind {
            NotifyKind::Idle => self.idle.clone(),
            NotifyKind::NewAddress => self.new_address.clone(),
            NotifyKind::ReloadPage => self.reload_page.clone(),
        }
    }
}
