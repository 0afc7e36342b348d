//! State-management core of a Try-Confirm-Cancel transaction coordinator
//!
//! Re-exports the workspace crates under one name:
//!
//! - [`types`]: transactions, participants and their status model
//! - [`config`]: configuration surface, loading and validation
//! - [`metrics`]: Prometheus metrics and tracing setup
//! - [`repository`]: storage ports, event pipeline, participant cache
//! - [`coordinator`]: recovery scheduler, lifecycle and bootstrap

pub use tcc_config as config;
pub use tcc_coordinator as coordinator;
pub use tcc_metrics as metrics;
pub use tcc_repository as repository;
pub use tcc_types as types;

pub use tcc_coordinator::{Coordinator, InvocationExecutor};
pub use tcc_repository::TransactionRepository;
