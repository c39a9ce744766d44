//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controller, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup and registration
//! - `controller_metrics` - Reconciliations, requeues and per-handler outcomes
//! - `release_metrics` - Release manager operations, rollbacks and history pruning

pub mod controller_metrics;
pub mod registry;
pub mod release_metrics;

pub use controller_metrics::*;
pub use registry::*;
pub use release_metrics::*;
