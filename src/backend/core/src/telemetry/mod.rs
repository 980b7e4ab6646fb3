//! Telemetry: structured logging and metric definitions.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::describe_metrics;
