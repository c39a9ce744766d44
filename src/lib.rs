//! Chart Release Controller Library
//!
//! Reconciles `Chart` custom resources into Helm releases.
//! Tests are included in the module files and under `tests/`.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod helm;
pub mod observability;
pub mod runtime;
pub mod store;

pub use crd::*;
