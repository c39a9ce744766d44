//! # Controller
//!
//! - `reconciler` - kube-runtime entry point and the per-Chart error state
//! - `pipeline` - ordered handlers run for each pass
//! - `resources` - the handlers themselves
//! - `context` - state handlers share within one pass
//! - `retry` / `backoff` - in-pass retries and error requeue timing
//! - `server` - metrics and probe endpoints

pub mod backoff;
pub mod context;
pub mod pipeline;
pub mod reconciler;
pub mod resources;
pub mod retry;
pub mod server;
