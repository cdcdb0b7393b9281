//! Application layer orchestrating the subscription lifecycle.
//!
//! The `Engine` wires the provisioning, payment reconciliation and maintenance
//! services over the domain ports, and starts the `Scheduler` that drives the
//! periodic sweeps.

pub mod engine;
pub mod provisioning;
pub mod reconciler;
pub mod scheduler;
pub mod sweeps;
