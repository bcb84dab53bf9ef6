//! # Utility Modules
//!
//! Supporting utilities used throughout the connector implementation.
//!
//! ## Components
//! - **Timeout**: default durations and bounded async waits
//! - **Metrics**: thread-safe observability counters

pub mod metrics;
pub mod timeout;

pub use metrics::ConnectorMetrics;
