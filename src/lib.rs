//! Live MJPEG streaming over plain HTTP
//!
//! An embedded HTTP server that turns a stream of JPEG frames into a
//! `multipart/x-mixed-replace` response any browser can render, with an
//! optional PIN gate in front of the stream address.
//!
//! # Overview
//!
//! ```text
//!  FrameSource ──► FrameSink ──► FrameQueue ──► Distributor ──► ClientSession × N
//!                                                   ▲
//!  browser ──► accept loop ──► router ──────────────┘ (stream requests)
//!                                 └──► pages, favicon, snapshot, redirects
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mjpeg_rs::{Frame, ServerConfig, StaticNotifyFrames, StreamServer};
//!
//! # async fn run(idle_jpeg: Vec<u8>, next_jpeg: impl Fn() -> Vec<u8>) -> mjpeg_rs::Result<()> {
//! let server = StreamServer::new(
//!     ServerConfig::default().pin("1234"),
//!     StaticNotifyFrames::uniform(Frame::new(idle_jpeg)),
//! );
//! let addr = server.start().await?;
//! println!("Open http://{}/", addr);
//!
//! let sink = server.frame_sink();
//! loop {
//!     sink.push_jpeg(next_jpeg());
//!     tokio::time::sleep(std::time::Duration::from_millis(40)).await;
//! }
//! # }
//! ```

pub mod error;
pub mod frame;
pub mod http;
pub mod security;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use frame::{
    Frame, FrameQueue, FrameSink, FrameSource, JpegEncoder, NotifyFrameGenerator, NotifyKind,
    StaticNotifyFrames,
};
pub use security::{generate_pin, AddressScheme};
pub use server::{ServerConfig, ServerEvent, ServerState, StopReason, StreamServer};
pub use stats::{ClientStats, StatsSnapshot, TrafficPoint};
