//! Prometheus metrics for the entity operator runtime
//!
//! Counters are labelled with the operator display name, so several
//! operators in one process report separately.

mod prometheus;

pub use prometheus::*;
