//! Xray access log ingestion.
//!
//! - `parser` turns one raw line into a [`LogEvent`] or rejects it
//! - `tailer` reads events incrementally from a persisted byte cursor

pub mod parser;
pub mod tailer;

pub use parser::LogEvent;
pub use tailer::{DrainSummary, Tailer};
