//! Stream client sessions
//!
//! A [`ClientSession`] is created for every connection routed to the stream
//! path. Once its preamble is written it joins the [`SessionSet`], where the
//! distributor finds it on every broadcast.

pub mod client;
pub mod set;
pub mod state;

pub use client::{BoxedWriter, ClientSession, SendPermit};
pub use set::SessionSet;
pub use state::SessionPhase;
