//! Evaluation results and coordinator counters.
//!
//! - `ResultTable`: per-era outcome histograms and win rates
//! - `ServerMetrics`: atomic request counters

pub mod results;
pub mod server_metrics;

pub use results::{Outcome, ResultTable, WinRateReport};
pub use server_metrics::{server_metrics, ServerMetrics, SharedServerMetrics};
