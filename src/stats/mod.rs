//! Client and traffic statistics

pub mod collector;
pub mod metrics;

pub use collector::StatsCollector;
pub use metrics::{ClientStats, StatsSnapshot, TrafficPoint};
