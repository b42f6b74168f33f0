//! Built-in stage implementations.

pub mod collector_sink;
pub mod gain_filter;
pub mod pattern_source;

pub use collector_sink::CollectorSink;
pub use gain_filter::GainFilter;
pub use pattern_source::PatternSource;
