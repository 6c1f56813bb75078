//! Engine statistics

pub mod metrics;

pub use metrics::EngineStats;
pub(crate) use metrics::Counters;
