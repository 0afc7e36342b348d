//! Metrics and logging for the TCC coordinator
//!
//! Process-wide Prometheus metrics for the event pipeline, participant cache
//! and recovery scheduler, plus tracing subscriber setup.
//!
//! # Example
//!
//! ```no_run
//! use tcc_metrics::{init_tracing, MetricsCollector};
//!
//! init_tracing("info", false).unwrap();
//!
//! let collector = MetricsCollector::new();
//! collector.record_event_published("create");
//!
//! println!("{}", collector.export_metrics().unwrap());
//! ```

pub mod collector;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError};
pub use tracing::{init_tracing, TracingError};
