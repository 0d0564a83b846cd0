//! The core of TCP anomaly and trading-protocol analysis.
//! Correlate packets into flows, classify anomalies, estimate flow spans and decode tag/value payloads.
pub mod utils;
pub mod core;
pub mod scan;
pub mod containers;
pub mod latency;
pub mod fix;
pub mod report;
